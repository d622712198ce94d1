use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::debug;

use super::resources::text_of;

/// Badge text the host renders inside tag groups that is not a tag.
const PLACEHOLDER: &str = "Generation data";
const ELLIPSIS: &str = "...";

static GROUP: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.mantine-Group-root").unwrap());
static BADGE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#".mantine-Badge-root, [class*="VotableTag"]"#).unwrap()
});

/// Auto-assigned tags from every badge group on the page, deduplicated in
/// order of first appearance.
pub fn extract(document: &Html) -> Vec<String> {
    let groups: Vec<_> = document.select(&GROUP).collect();
    let badges = groups
        .iter()
        .flat_map(|group| group.select(&BADGE))
        .map(|badge| text_of(&badge));

    let tags = dedup(badges);
    debug!(groups = groups.len(), tags = tags.len(), "extracted tags");
    tags
}

/// Clean raw badge texts and keep the first occurrence of each tag.
/// Comparison is exact and case-sensitive.
pub fn dedup<I, S>(texts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags: Vec<String> = Vec::new();
    for text in texts {
        if let Some(tag) = clean(text.as_ref()) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

/// Strip the vote-count suffix from a badge text. `None` for texts that
/// are not tags at all.
pub fn clean(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() || text.contains(PLACEHOLDER) || text == ELLIPSIS {
        return None;
    }
    let tag = text.trim_end_matches(|c: char| c.is_ascii_digit()).trim();
    (!tag.is_empty()).then(|| tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_counts_stripped_and_merged() {
        assert_eq!(
            dedup(["character123", "character", "style45"]),
            vec!["character", "style"]
        );
    }

    #[test]
    fn clean_rejects_non_tags() {
        assert_eq!(clean("   "), None);
        assert_eq!(clean("..."), None);
        assert_eq!(clean("Generation data"), None);
        assert_eq!(clean("1234"), None);
        assert_eq!(clean(" anime 12 ").as_deref(), Some("anime"));
        assert_eq!(clean("3d render").as_deref(), Some("3d render"));
    }

    #[test]
    fn dedup_is_case_sensitive() {
        assert_eq!(dedup(["Woman", "woman", "Woman9"]), vec!["Woman", "woman"]);
    }

    #[test]
    fn badges_and_votable_tags_across_groups() {
        let doc = Html::parse_document(
            r#"<div class="mantine-Group-root">
                 <div class="mantine-Badge-root">character123</div>
                 <div class="VotableTag_wrapper__a1"><span>character</span></div>
                 <div class="mantine-Badge-root">...</div>
               </div>
               <p class="mantine-Badge-root">outside1</p>
               <div class="mantine-Group-root">
                 <span class="mantine-Badge-root">style45</span>
                 <span class="other">ignored</span>
               </div>"#,
        );
        assert_eq!(extract(&doc), vec!["character", "style"]);
    }

    #[test]
    fn same_snapshot_same_tags() {
        let doc = Html::parse_document(
            r#"<div class="mantine-Group-root">
                 <span class="mantine-Badge-root">b2</span>
                 <span class="mantine-Badge-root">a1</span>
               </div>"#,
        );
        assert_eq!(extract(&doc), extract(&doc));
        assert_eq!(extract(&doc), vec!["b", "a"]);
    }
}
