//! Assistant messages and prompts emitted by the capture pipeline

/// Characters of extracted text shown back to the user
pub(crate) const PREVIEW_CHARS: usize = 300;

pub(crate) const NO_TEXT_APOLOGY: &str = "I couldn't find any text in this image. Please try capturing a book page with clearer text and better lighting.";

pub(crate) const SCENE_INVITATION: &str =
    "Would you like to discuss what this scene might mean or represent?";

pub(crate) const SCENE_FAILED: &str =
    "I couldn't generate a scene description. Please try capturing a different image.";

/// Grounding prefix for scene descriptions
pub(crate) const SCENE_PREFIX: &str = "Scene: ";

/// First `PREVIEW_CHARS` characters, with "..." appended if anything was cut
pub(crate) fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Assistant turn announcing extracted text
pub(crate) fn text_found(text: &str) -> String {
    format!(
        "I've read the text from your book page. Here's what I found:\n\n\"{}\"\n\nWhat would you like to discuss about this passage?",
        preview(text)
    )
}

/// Assistant turn presenting a scene description
pub(crate) fn scene_described(description: &str) -> String {
    format!(
        "I couldn't find any text in this image, but I can describe what I see: {}.",
        description
    )
}
