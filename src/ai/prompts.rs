/// Human-readable name for common language codes; anything else is passed through.
pub fn language_name(lang: &str) -> String {
    let name = match lang {
        "en" | "en-us" | "en-gb" => "English",
        "zh" | "zh-cn" | "zh-hans" => "Simplified Chinese",
        "zh-tw" | "zh-hk" | "zh-hant" => "Traditional Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "pt" | "pt-br" => "Portuguese",
        "ru" => "Russian",
        "it" => "Italian",
        _ => return lang.to_string(),
    };
    format!("{} ({})", name, lang)
}

pub fn translate_system(lang: &str) -> String {
    format!(
        "You are a professional translator for a blog. Translate the article title and body into {}. \
         Keep Markdown, HTML tags, code blocks, links and image references exactly as they are; \
         translate only human-readable text. Do not add commentary.\n\
         Respond as JSON: {{\"title\": \"...\", \"text\": \"...\"}}",
        language_name(lang)
    )
}

pub fn translate_user(title: &str, text: &str) -> String {
    format!("Title:\n{}\n\nBody:\n{}", title, text)
}

pub fn summarize_system(lang: &str) -> String {
    format!(
        "You write concise summaries of blog articles. Summarize the article in {} \
         in 2-4 sentences (at most 200 words), plain text without Markdown.\n\
         Respond as JSON: {{\"summary\": \"...\"}}",
        language_name(lang)
    )
}

pub fn summarize_user(title: &str, text: &str) -> String {
    format!("Title: {}\n\n{}", title, text)
}

pub fn polish_system() -> String {
    "You are an editor. Improve the clarity, grammar and flow of the text while keeping its \
     meaning, language, tone and formatting (Markdown/HTML) intact. Do not add new content.\n\
     Respond as JSON: {\"text\": \"...\"}"
        .to_string()
}

pub fn slug_system() -> String {
    "Generate an SEO-friendly URL slug in English for the given article title. \
     Rules: lowercase ASCII letters, digits and hyphens only, 3-6 words, no stop words, \
     translate non-English titles.\n\
     Respond as JSON: {\"slug\": \"...\"}"
        .to_string()
}

pub fn moderate_system() -> String {
    "You moderate comments on a personal blog. Decide what to do with the comment:\n\
     - \"approved\": normal, on-topic or harmless comment\n\
     - \"waiting\": unsure, needs a human to review\n\
     - \"spam\": advertising, SEO links, scams, abuse or gibberish\n\
     Respond as JSON: {\"action\": \"approved|waiting|spam\", \"reason\": \"short reason\"}"
        .to_string()
}

pub fn moderate_user(author: &str, email: &str, url: &str, text: &str) -> String {
    format!(
        "Author: {}\nE-mail: {}\nWebsite: {}\nComment:\n{}",
        author, email, url, text
    )
}
