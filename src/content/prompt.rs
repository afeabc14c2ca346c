//! Prompt construction for content generation.

use super::model::GenerateRequest;

/// System message sent with every generation request.
pub const COPYWRITER_SYSTEM_PROMPT: &str = "You are a helpful social media copywriter. \
     You output strict JSON only, with no commentary and no markdown.";

/// Build the user prompt for a generation request.
///
/// The model is told to answer with a single JSON object holding `captions`,
/// `hashtags` and `ideas`. It does not always comply; the normalizer copes.
pub fn build_prompt(req: &GenerateRequest) -> String {
    let mut prompt = String::from(
        "Produce output as strict JSON only (no commentary). The JSON must have keys: \
         captions (array of short strings), hashtags (array), \
         ideas (array of objects with title, description, imageIdea).\n\n",
    );

    prompt.push_str(&format!("Platform: {}\n", req.platform.trim()));
    prompt.push_str(&format!("Industry: {}\n", req.industry.trim()));
    prompt.push_str(&format!("Tone: {}\n", req.tone()));
    if let Some(keywords) = req.keywords() {
        prompt.push_str(&format!("Keywords: {keywords}\n"));
    }

    prompt.push_str(
        "\nRequirements:\n\
         - Provide up to 10 short captions (max 150 chars each) in captions array.\n\
         - Provide a list of up to 20 hashtags (include # prefix) in hashtags array.\n\
         - Provide 3 post ideas with title, description (~30-60 chars), and an imageIdea short phrase.\n\
         \nReturn only JSON and nothing else.\n\
         \nExample JSON structure:\n\
         {\n  \"captions\": [\"...\"],\n  \"hashtags\": [\"#tag1\",\"#tag2\"],\n  \
         \"ideas\": [{\"title\":\"...\",\"description\":\"...\",\"imageIdea\":\"...\"}]\n}\n\n\
         Now generate for the input above.",
    );

    prompt
}
