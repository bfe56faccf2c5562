use crate::config::SpamConfig;

/// Case-insensitive keyword match over `subject + " " + body`.
#[derive(Debug, Clone)]
pub struct SpamClassifier {
    keywords: Vec<String>,
}

impl SpamClassifier {
    pub fn new(keywords: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &SpamConfig) -> Self {
        Self::new(&config.keywords)
    }

    /// The first keyword found, if any.
    pub fn matched_keyword(&self, subject: &str, body: &str) -> Option<&str> {
        let text = format!("{} {}", subject, body).to_lowercase();
        self.keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
            .map(|k| k.as_str())
    }

    pub fn is_spam(&self, subject: &str, body: &str) -> bool {
        self.matched_keyword(subject, body).is_some()
    }
}

impl Default for SpamClassifier {
    fn default() -> Self {
        Self::new(crate::config::schema::default_spam_keywords())
    }
}
