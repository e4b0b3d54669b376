/// Detail page parser built on selector fallback chains
///
/// Every field is described by an ordered list of CSS selectors. The chain
/// is walked until one selector yields content; later entries cover older or
/// alternate page layouts. A field whose chain yields nothing stays at its
/// zero value, so parsing never fails.
use super::Metadata;
use crate::code::CatalogCode;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

/// Ordered selector list for one field
pub struct SelectorChain {
    name: &'static str,
    selectors: Vec<(&'static str, Selector)>,
}

impl SelectorChain {
    pub fn new(name: &'static str, selectors: &[&'static str]) -> Self {
        let selectors = selectors
            .iter()
            .filter_map(|s| Selector::parse(s).ok().map(|sel| (*s, sel)))
            .collect();
        Self { name, selectors }
    }

    /// First selector whose first match satisfies `extract`
    pub fn first<'a, T>(&self, document: &'a Html, extract: impl Fn(ElementRef<'a>) -> Option<T>) -> Option<T> {
        for (source, selector) in &self.selectors {
            if let Some(value) = document.select(selector).next().and_then(&extract) {
                debug!("{}: matched '{}'", self.name, source);
                return Some(value);
            }
        }
        None
    }

    /// Trimmed text of every match from the first selector that matches anything
    pub fn all_texts(&self, document: &Html) -> Vec<String> {
        for (source, selector) in &self.selectors {
            let values: Vec<String> = document
                .select(selector)
                .map(|el| element_text(&el))
                .filter(|t| !t.is_empty())
                .collect();
            if !values.is_empty() {
                debug!("{}: matched '{}' ({} values)", self.name, source, values.len());
                return values;
            }
        }
        Vec::new()
    }
}

static TITLE: LazyLock<SelectorChain> = LazyLock::new(|| {
    SelectorChain::new("title", &["h3.post-title", "h3", "div.video h3", "div#video_title h3"])
});

static COVER: LazyLock<SelectorChain> = LazyLock::new(|| {
    SelectorChain::new("cover", &["img#video_jacket_img", "img.video-jacket", "div#video_jacket img"])
});

static GENRES: LazyLock<SelectorChain> = LazyLock::new(|| {
    SelectorChain::new("genres", &["div#video_genres a.genre", "div.genre a", "span.genre a"])
});

static CAST: LazyLock<SelectorChain> = LazyLock::new(|| {
    SelectorChain::new(
        "cast",
        &[
            r#"div#video_cast a[href*="vl_star.php"]"#,
            r#"div.cast a[href*="vl_star.php"]"#,
            "span.star a",
        ],
    )
});

static MAKER: LazyLock<SelectorChain> =
    LazyLock::new(|| SelectorChain::new("maker", &[r#"a[href*="vl_maker.php"]"#, "div.maker a"]));

static LABEL: LazyLock<SelectorChain> =
    LazyLock::new(|| SelectorChain::new("label", &[r#"a[href*="vl_label.php"]"#, "div.label a"]));

static INFO: LazyLock<SelectorChain> =
    LazyLock::new(|| SelectorChain::new("release_date", &["div#video_info", "div.info", "table.info"]));

static RATING: LazyLock<SelectorChain> =
    LazyLock::new(|| SelectorChain::new("rating", &["span.score", "div.score", "span.rating"]));

static DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").unwrap());

/// Parses catalog detail pages into [`Metadata`]
#[derive(Debug, Clone)]
pub struct DetailPageParser {
    base_url: String,
}

impl DetailPageParser {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn parse(&self, html: &str, code: &CatalogCode) -> Metadata {
        let document = Html::parse_document(html);

        let title = TITLE
            .first(&document, |el| non_empty(element_text(&el)))
            .unwrap_or_default();

        let cover_url = COVER
            .first(&document, |el| el.value().attr("src").and_then(|src| non_empty(src.trim().to_string())))
            .map(|src| self.absolutize(&src))
            .unwrap_or_default();

        let genres = GENRES.all_texts(&document);
        let actors = CAST.all_texts(&document);

        let studio = MAKER
            .first(&document, |el| non_empty(element_text(&el)))
            .or_else(|| LABEL.first(&document, |el| non_empty(element_text(&el))))
            .unwrap_or_default();

        let release_date = INFO
            .first(&document, |el| {
                let text = el.text().collect::<String>();
                DATE.captures(&text).map(|c| c[1].to_string())
            })
            .unwrap_or_default();

        let rating = RATING
            .first(&document, |el| parse_rating(&element_text(&el)))
            .unwrap_or(0.0);

        let metadata = Metadata {
            code: code.clone(),
            title,
            genres,
            actors,
            studio,
            release_date,
            rating,
            cover_url,
        };

        if metadata.is_blank() {
            let div_ids: Vec<String> = Selector::parse("div[id]")
                .map(|sel| {
                    document
                        .select(&sel)
                        .take(10)
                        .filter_map(|d| d.value().id().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            debug!("No primary fields found for {}, page div ids: {:?}", code, div_ids);
        }

        metadata
    }

    /// Resolve protocol-relative and root-relative image sources
    fn absolutize(&self, src: &str) -> String {
        if let Some(rest) = src.strip_prefix("//") {
            format!("https://{}", rest)
        } else if src.starts_with('/') {
            format!("{}{}", self.base_url, src)
        } else {
            src.to_string()
        }
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_rating(text: &str) -> Option<f64> {
    text.trim_matches(|c| c == '(' || c == ')').trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_PAGE: &str = r#"
        <html><head><title>CJOD-160 Some Title - JAVLibrary</title></head>
        <body>
          <div id="video_title"><h3 class="post-title text"><a href="/cn/?v=javli123">CJOD-160 Some Title</a></h3></div>
          <div id="video_jacket"><img id="video_jacket_img" src="//pics.dmm.co.jp/mono/movie/adult/cjod160/cjod160pl.jpg"></div>
          <div id="video_info">
            <div id="video_date"><table><tr><td class="header">发行日期:</td><td class="text">2018-09-07</td></tr></table></div>
            <div id="video_maker"><span class="maker"><a href="vl_maker.php?m=arlq" rel="tag">痴女ヘブン</a></span></div>
            <div id="video_label"><span class="label"><a href="vl_label.php?l=bfaq" rel="tag">CHIJO HEAVEN</a></span></div>
            <div id="video_review"><span class="score">(8.20)</span></div>
            <div id="video_genres">
              <span class="genre"><a href="vl_genre.php?g=ky" class="genre" rel="category tag">ドラマ</a></span>
              <span class="genre"><a href="vl_genre.php?g=a4" class="genre" rel="category tag">Big Tits</a></span>
            </div>
            <div id="video_cast">
              <span class="star"><a href="vl_star.php?s=ayuqi" rel="tag">山田花子</a></span>
              <span class="star"><a href="vl_star.php?s=azcbe" rel="tag">鈴木一美</a></span>
            </div>
          </div>
        </body></html>
    "#;

    fn code() -> CatalogCode {
        CatalogCode::new("CJOD", "160")
    }

    #[test]
    fn test_parses_full_detail_page() {
        let parser = DetailPageParser::new("https://www.javlibrary.com/");
        let metadata = parser.parse(DETAIL_PAGE, &code());

        assert_eq!(metadata.title, "CJOD-160 Some Title");
        assert_eq!(metadata.cover_url, "https://pics.dmm.co.jp/mono/movie/adult/cjod160/cjod160pl.jpg");
        assert_eq!(metadata.genres, vec!["ドラマ", "Big Tits"]);
        assert_eq!(metadata.actors, vec!["山田花子", "鈴木一美"]);
        assert_eq!(metadata.studio, "痴女ヘブン");
        assert_eq!(metadata.release_date, "2018-09-07");
        assert!((metadata.rating - 8.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_document_yields_zero_values() {
        let parser = DetailPageParser::new("https://www.javlibrary.com");
        let metadata = parser.parse("<html><body><p>nothing here</p></body></html>", &code());

        assert_eq!(metadata.code, code());
        assert!(metadata.title.is_empty());
        assert!(metadata.genres.is_empty());
        assert!(metadata.actors.is_empty());
        assert!(metadata.studio.is_empty());
        assert!(metadata.release_date.is_empty());
        assert!(metadata.cover_url.is_empty());
        assert_eq!(metadata.rating, 0.0);
        assert!(metadata.is_blank());
    }

    #[test]
    fn test_studio_falls_back_to_label() {
        let html = r#"<div class="label"><a href="/x">S1 NO.1 STYLE</a></div>"#;
        let metadata = DetailPageParser::new("https://x").parse(html, &code());
        assert_eq!(metadata.studio, "S1 NO.1 STYLE");
    }

    #[test]
    fn test_alternate_genre_and_cast_layouts() {
        let html = r#"
            <div class="genre"><a>Drama</a><a>Solowork</a></div>
            <span class="star"><a>Actress A</a></span>
        "#;
        let metadata = DetailPageParser::new("https://x").parse(html, &code());
        assert_eq!(metadata.genres, vec!["Drama", "Solowork"]);
        assert_eq!(metadata.actors, vec!["Actress A"]);
    }

    #[test]
    fn test_root_relative_cover() {
        let html = r#"<img class="video-jacket" src="/img/cover.jpg">"#;
        let metadata = DetailPageParser::new("https://www.javlibrary.com/").parse(html, &code());
        assert_eq!(metadata.cover_url, "https://www.javlibrary.com/img/cover.jpg");
    }

    #[test]
    fn test_unparseable_rating_is_zero() {
        let html = r#"<span class="score">(n/a)</span>"#;
        let metadata = DetailPageParser::new("https://x").parse(html, &code());
        assert_eq!(metadata.rating, 0.0);
    }

    #[test]
    fn test_rating_falls_through_to_next_selector() {
        let html = r#"<span class="score">()</span><span class="rating">7.5</span>"#;
        let metadata = DetailPageParser::new("https://x").parse(html, &code());
        assert_eq!(metadata.rating, 7.5);
    }

    #[test]
    fn test_release_date_from_second_container() {
        let html = r#"<div class="info">Released 2020-01-31 by someone</div>"#;
        let metadata = DetailPageParser::new("https://x").parse(html, &code());
        assert_eq!(metadata.release_date, "2020-01-31");
    }
}
