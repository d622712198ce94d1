use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::record::ResourceUsed;

const HEADER_TEXT: &str = "Resources used";

static TEXT_NODE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.mantine-Text-root").unwrap());
static LIST: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ul").unwrap());
static ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").unwrap());
static NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.underline").unwrap());
static TYPE_BADGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".mantine-Badge-label").unwrap());
static VERSION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.text-xs").unwrap());

/// Resources listed under the "Resources used" header of the generation
/// data card. Missing header or list gives an empty result.
pub fn extract(document: &Html) -> Vec<ResourceUsed> {
    let Some(list) = find_list(document) else {
        warn!("Resources list not found");
        return Vec::new();
    };

    let resources: Vec<ResourceUsed> = list.select(&ITEM).filter_map(parse_item).collect();
    debug!(count = resources.len(), "extracted resources");
    resources
}

/// The list belongs to the header's closest `div`, or failing that to the
/// element right after it. Only the first matching header is considered.
fn find_list(document: &Html) -> Option<ElementRef<'_>> {
    let header = document
        .select(&TEXT_NODE)
        .find(|el| text_of(el) == HEADER_TEXT)?;

    let container = header
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "div")?;

    if let Some(list) = container.select(&LIST).next() {
        return Some(list);
    }
    let sibling = container.next_siblings().find_map(ElementRef::wrap)?;
    sibling.select(&LIST).next()
}

fn parse_item(item: ElementRef<'_>) -> Option<ResourceUsed> {
    let name = first_text(item, &NAME).filter(|name| !name.is_empty());
    let Some(name) = name else {
        debug!("skipping resource item without a name");
        return None;
    };
    Some(ResourceUsed {
        name,
        kind: first_text(item, &TYPE_BADGE).unwrap_or_default(),
        version: first_text(item, &VERSION).unwrap_or_default(),
    })
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().map(|el| text_of(&el))
}

pub(crate) fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(html: &str) -> Vec<ResourceUsed> {
        extract(&Html::parse_document(html))
    }

    #[test]
    fn single_checkpoint_in_same_container() {
        let got = resources(
            r#"<div>
                 <p class="mantine-Text-root">Resources used</p>
                 <ul>
                   <li>
                     <p class="underline">Pony Diffusion</p>
                     <span class="mantine-Badge-label">Checkpoint</span>
                     <p class="text-xs">v6</p>
                   </li>
                 </ul>
               </div>"#,
        );
        assert_eq!(
            got,
            vec![ResourceUsed {
                name: "Pony Diffusion".into(),
                kind: "Checkpoint".into(),
                version: "v6".into(),
            }]
        );
    }

    #[test]
    fn list_in_next_sibling_container() {
        let got = resources(
            r#"<section>
                 <div><p class="mantine-Text-root"> Resources used </p></div>
                 <div><ul><li><p class="underline">Detail Tweaker</p></li></ul></div>
               </section>"#,
        );
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "Detail Tweaker");
        assert_eq!(got[0].kind, "");
        assert_eq!(got[0].version, "");
    }

    #[test]
    fn items_without_name_are_skipped() {
        let got = resources(
            r#"<div>
                 <p class="mantine-Text-root">Resources used</p>
                 <ul>
                   <li><span class="mantine-Badge-label">LoRA</span></li>
                   <li><p class="underline">   </p></li>
                   <li><p class="underline">Kept</p><p class="text-xs">v1.0</p></li>
                 </ul>
               </div>"#,
        );
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "Kept");
        assert_eq!(got[0].version, "v1.0");
    }

    #[test]
    fn no_header_or_no_list_is_empty() {
        assert!(resources("<div><ul><li><p class=\"underline\">X</p></li></ul></div>").is_empty());
        assert!(resources(r#"<div><p class="mantine-Text-root">Resources used</p></div>"#).is_empty());
    }

    #[test]
    fn header_text_must_match_exactly() {
        let got = resources(
            r#"<div>
                 <p class="mantine-Text-root">Resources used in this post</p>
                 <ul><li><p class="underline">X</p></li></ul>
               </div>"#,
        );
        assert!(got.is_empty());
    }
}
