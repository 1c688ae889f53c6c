//! Human-readable slugs: generated once from a title or query, collisions
//! resolved by a random hex suffix.

use uuid::Uuid;

const MAX_SLUG_LEN: usize = 50;

/// Parameterize a title into a slug: lowercase, non-alphanumeric runs
/// collapsed to single dashes, truncated to 50 chars. Returns None when
/// nothing survives normalization.
pub fn slugify(base: &str) -> Option<String> {
    let mut out = String::new();
    let mut last_dash = true; // suppress a leading dash

    for ch in base.chars() {
        if ch.is_alphanumeric() {
            for lc in ch.to_lowercase() {
                out.push(lc);
            }
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
        if out.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    let trimmed = out.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Append a short random suffix for collision resolution.
pub fn with_suffix(base: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{base}-{}", &hex[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_dashes() {
        assert_eq!(
            slugify("Neural Scaling Laws").as_deref(),
            Some("neural-scaling-laws")
        );
    }

    #[test]
    fn collapses_punctuation_runs() {
        assert_eq!(
            slugify("What's next -- for AI?").as_deref(),
            Some("what-s-next-for-ai")
        );
    }

    #[test]
    fn empty_after_normalization() {
        assert_eq!(slugify("!!!"), None);
        assert_eq!(slugify(""), None);
    }

    #[test]
    fn truncates_long_titles() {
        let long = "a".repeat(200);
        let slug = slugify(&long).unwrap();
        assert!(slug.len() <= 50);
    }

    #[test]
    fn suffix_is_appended() {
        let s = with_suffix("neural-scaling-laws");
        assert!(s.starts_with("neural-scaling-laws-"));
        assert_eq!(s.len(), "neural-scaling-laws-".len() + 8);
    }
}
