//! Topic name and filter validation, and the topic matching algorithm that
//! the subscription table uses to decide which subscribers receive a
//! PUBLISH.

/// Validate a topic name (used in PUBLISH). Topic names must be non-empty,
/// free of wildcards, and free of null characters.
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }
    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }
    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }
    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }
    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE/UNSUBSCRIBE).
///
/// - `#` must occupy an entire level and must be the last level.
/// - `+` must occupy an entire level; it may appear at any level.
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }
    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }
    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let levels: Vec<&str> = filter.split('/').collect();

    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != levels.len() - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }
        if level.contains('+') && *level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}

/// True if a published topic matches a subscription filter.
///
/// `/` separates levels; `+` matches exactly one level; `#` matches zero or
/// more trailing levels and must be the filter's last level. Matching is a
/// purely structural comparison of the split parts — no topic is given
/// special non-matching treatment, including `$`-prefixed topics.
pub fn matches(filter: &str, topic: &str) -> bool {
    matches_parts(
        &filter.split('/').collect::<Vec<_>>(),
        &topic.split('/').collect::<Vec<_>>(),
    )
}

/// Same algorithm as [`matches`], operating directly on already-split parts
/// so callers that split once up front (e.g. table-driven tests) can avoid
/// re-splitting on every comparison.
pub fn matches_parts(filter_parts: &[&str], topic_parts: &[&str]) -> bool {
    let mut ti = 0;
    let mut fi = 0;

    while fi < filter_parts.len() {
        let filter_part = filter_parts[fi];

        if filter_part == "#" {
            return true;
        }

        if ti >= topic_parts.len() {
            return false;
        }

        if filter_part == "+" || filter_part == topic_parts[ti] {
            ti += 1;
            fi += 1;
        } else {
            return false;
        }
    }

    ti == topic_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_topic_name_rejects_wildcards_and_empty() {
        assert!(validate_topic_name("a/b/c").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a/+/c").is_err());
        assert!(validate_topic_name("a/#").is_err());
    }

    #[test]
    fn validate_topic_filter_accepts_well_formed_wildcards() {
        assert!(validate_topic_filter("a/b").is_ok());
        assert!(validate_topic_filter("+").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("a/+/c").is_ok());
        assert!(validate_topic_filter("a/#").is_ok());
    }

    #[test]
    fn validate_topic_filter_rejects_malformed_wildcards() {
        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("a+").is_err());
        assert!(validate_topic_filter("a#").is_err());
        assert!(validate_topic_filter("a/#/b").is_err());
    }

    #[test]
    fn exact_filters_match_only_identical_topics() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b/d"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn plus_matches_exactly_one_level() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/x/c"));
        assert!(!matches("a/+", "a"));
    }

    #[test]
    fn hash_matches_zero_or_more_trailing_levels() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c"));
        assert!(matches("#", "anything/at/all"));
    }

    #[test]
    fn dollar_prefixed_topics_are_ordinary_topics() {
        // No $SYS-style exclusion: a leading `#` or `+` filter matches
        // `$`-prefixed topics exactly like any other topic.
        assert!(matches("#", "$SYS/broker/clients"));
        assert!(matches("$SYS/#", "$SYS/broker/clients"));
        assert!(matches("+/broker", "$SYS/broker"));
        assert!(matches("$SYS/broker", "$SYS/broker"));
    }
}
