use std::env;
use std::sync::OnceLock;

static FOLDRS_CONSTANT_FOLDING: OnceLock<bool> = OnceLock::new();
static FOLDRS_FOLD_THREADS: OnceLock<usize> = OnceLock::new();
static FOLDRS_FOLD_MAX_ITERS: OnceLock<usize> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_count(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => match value.trim().parse::<usize>() {
            Ok(count) if count > 0 => count,
            _ => {
                log::warn!("ignoring invalid {name}={value:?}, using {default}");
                default
            }
        },
        _ => default,
    }
}

pub(crate) fn constant_folding_enabled() -> bool {
    *FOLDRS_CONSTANT_FOLDING.get_or_init(|| match env::var("FOLDRS_CONSTANT_FOLDING") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => true,
    })
}

pub(crate) fn fold_worker_threads() -> usize {
    *FOLDRS_FOLD_THREADS.get_or_init(|| parse_count("FOLDRS_FOLD_THREADS", 1))
}

pub(crate) fn fold_max_iters() -> usize {
    *FOLDRS_FOLD_MAX_ITERS.get_or_init(|| parse_count("FOLDRS_FOLD_MAX_ITERS", 8))
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "on"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "nope"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
