use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use tokio::fs;

use crate::config::DisplaySize;
use crate::model::{MediaItem, Profile};
use crate::Result;

const TEMPLATE: &str = include_str!("../templates/gallery.hbs");
const SAVE_ICON: &str = "\u{1F4BE}";
const OPEN_ICON: &str = "\u{1F30E}";

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Items per section of the page.
    pub per_page: usize,
    pub size: DisplaySize,
}

#[derive(Serialize)]
struct Gallery<'a> {
    profile: &'a Profile,
    total: usize,
    sections: Vec<Section>,
}

#[derive(Serialize)]
struct Section {
    number: usize,
    cards: Vec<Card>,
}

/// An anchor, either opening the post in a new tab or downloading the media.
#[derive(Serialize)]
struct Link {
    href: String,
    download: bool,
}

/// One post. A video's image opens the post and its button downloads the file,
/// an image is the other way around.
#[derive(Serialize)]
struct Card {
    image: Link,
    button: Link,
    icon: &'static str,
    src: String,
    /// Full size media shown in the lightbox.
    full: String,
    /// Only the first section loads eagerly, the rest load when shown.
    src_attr: &'static str,
    is_video: bool,
    likes: String,
    date: String,
    caption: String,
    location: Option<String>,
}

/// Renders `items`, in the given order, into a single HTML page split in sections of
/// `per_page` items.
pub fn render(
    profile: &Profile,
    items: &[MediaItem],
    base_url: &str,
    opts: RenderOptions,
) -> Result<String> {
    let sections = items
        .chunks(opts.per_page.max(1))
        .enumerate()
        .map(|(idx, chunk)| Section {
            number: idx + 1,
            cards: chunk
                .iter()
                .map(|item| card(item, base_url, opts.size, idx == 0))
                .collect(),
        })
        .collect();
    let gallery = Gallery {
        profile,
        total: items.len(),
        sections,
    };

    let mut hb = Handlebars::new();
    hb.register_template_string("gallery", TEMPLATE)?;
    Ok(hb.render("gallery", &gallery)?)
}

/// Renders and writes `<out_dir>/<username>.html`.
pub async fn write_gallery(
    out_dir: &Path,
    profile: &Profile,
    items: &[MediaItem],
    base_url: &str,
    opts: RenderOptions,
) -> Result<PathBuf> {
    let html = render(profile, items, base_url, opts)?;
    fs::create_dir_all(out_dir).await?;
    let path = out_dir.join(format!("{}.html", profile.username));
    fs::write(&path, html).await?;
    Ok(path)
}

fn card(item: &MediaItem, base_url: &str, size: DisplaySize, eager: bool) -> Card {
    let src = match size {
        DisplaySize::Thumb => item
            .local_thumb
            .clone()
            .unwrap_or_else(|| item.thumbnail_url.clone()),
        DisplaySize::Full => item.display_url.clone(),
    };
    let likes = if item.is_video() {
        format!("{} [vid]", item.likes)
    } else {
        item.likes.to_string()
    };
    let open = Link {
        href: format!("{base_url}/p/{}/", item.shortcode),
        download: false,
    };
    let save = Link {
        href: item.display_url.clone(),
        download: true,
    };
    let (image, button, icon) = if item.is_video() {
        (open, save, SAVE_ICON)
    } else {
        (save, open, OPEN_ICON)
    };
    Card {
        image,
        button,
        icon,
        src,
        full: item.display_url.clone(),
        src_attr: if eager { "src" } else { "data-src" },
        is_video: item.is_video(),
        likes,
        date: item.date_label(),
        caption: item.caption(),
        location: item.location.clone(),
    }
}
