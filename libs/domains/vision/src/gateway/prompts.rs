//! Fixed prompt contract for image description.

/// User-turn text sent alongside every image.
pub const USER_INSTRUCTION: &str = "What are the main objects in this image? Provide keywords.";

/// System prompt asking for a bare JSON object in `language`.
pub fn system_prompt(language: &str) -> String {
    format!(
        "Carefully examine the provided image. Give a description and extract the keywords that \
describe the main objects, scenes and subjects present in the image.
Return the result as JSON, written in {language}, with the following keys: description and keywords.
Write the description and keywords directly, without extra replies or unnecessary explanations \
such as \"Here is the description and the keywords of the image:\".
Do not include code fences or any additional formatting, just return the JSON."
    )
}
