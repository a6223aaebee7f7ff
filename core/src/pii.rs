//! Masking of likely personal data before summaries leave this layer.

use regex::Regex;

/// Pure text transform; no I/O.
pub trait PiiMasker: Send + Sync {
    fn mask(&self, text: &str) -> String;
}

/// Regex masker for email addresses and phone numbers (JP domestic and international forms)
pub struct RegexPiiMasker {
    email: Regex,
    phone: Regex,
}

impl Default for RegexPiiMasker {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexPiiMasker {
    pub fn new() -> Self {
        let email = Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)+")
            .expect("email pattern is valid");
        let phone = Regex::new(
            r"(?:\+\d{1,3}[\s\-]?)?\(?\d{1,4}\)?[\s\-]?\(?\d{1,4}\)?[\s\-]?\d{3,4}",
        )
        .expect("phone pattern is valid");
        Self { email, phone }
    }
}

impl PiiMasker for RegexPiiMasker {
    fn mask(&self, text: &str) -> String {
        let masked = self.email.replace_all(text, "[email]");
        let masked = self.phone.replace_all(&masked, |caps: &regex::Captures| {
            let digits = caps[0].chars().filter(|c| c.is_ascii_digit()).count();
            // Short digit runs (dates, counts) are not phone numbers
            if digits >= 10 {
                "[phone]".to_string()
            } else {
                caps[0].to_string()
            }
        });
        masked.into_owned()
    }
}
