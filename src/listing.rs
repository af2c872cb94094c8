//! Directory listing view model and HTML rendering.
//!
//! Purely derives markup from a single directory read; no side effects beyond
//! the read itself.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::io;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

/*
Icons from https://lucide.dev/
See also https://feathericons.com/
Icons are used under the following license:

Copyright (c) for portions of Lucide are held by Cole Bemis 2013-2022 as part of Feather (MIT). All other copyright (c) for Lucide are held by Lucide Contributors 2022.
Permission to use, copy, modify, and/or distribute this software for any purpose with or without fee is hereby granted, provided that the above copyright notice and this permission notice appear in all copies.
THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR DISCLAIMS ALL WARRANTIES WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL THE AUTHOR BE LIABLE FOR ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.
*/
pub const FOLDER_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round"><path d="M4 20h16a2 2 0 0 0 2-2V8a2 2 0 0 0-2-2h-7.93a2 2 0 0 1-1.66-.9l-.82-1.2A2 2 0 0 0 7.93 3H4a2 2 0 0 0-2 2v13c0 1.1.9 2 2 2Z"></path></svg>"#;
pub const SAVE_DIR_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round"><path d="M4 20h16a2 2 0 0 0 2-2V8a2 2 0 0 0-2-2h-7.93a2 2 0 0 1-1.66-.9l-.82-1.2A2 2 0 0 0 7.93 3H4a2 2 0 0 0-2 2v13c0 1.1.9 2 2 2Z"></path><path d="M12 10v6"></path><path d="m15 13-3 3-3-3"></path></svg>"#;
const VIDEO_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round"><rect x="2" y="2" width="20" height="20" rx="2.18" ry="2.18"></rect><line x1="7" y1="2" x2="7" y2="22"></line><line x1="17" y1="2" x2="17" y2="22"></line><line x1="2" y1="12" x2="22" y2="12"></line><line x1="2" y1="7" x2="7" y2="7"></line><line x1="2" y1="17" x2="7" y2="17"></line><line x1="17" y1="17" x2="22" y2="17"></line><line x1="17" y1="7" x2="22" y2="7"></line></svg>"#;
const BOOK_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round"><path d="M2 3h6a4 4 0 0 1 4 4v14a3 3 0 0 0-3-3H2z"></path><path d="M22 3h-6a4 4 0 0 0-4 4v14a3 3 0 0 1 3-3h7z"></path></svg>"#;
const MUSIC_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round"><path d="M9 18V5l12-2v13"></path><circle cx="6" cy="18" r="3"></circle><circle cx="18" cy="16" r="3"></circle></svg>"#;
const UNKNOWN_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round"><circle cx="12" cy="12" r="10"></circle><path d="M9.09 9a3 3 0 0 1 5.83 1c0 2-3 3-3 3"></path><line x1="12" y1="17" x2="12.01" y2="17"></line></svg>"#;

/// One immediate child of a listed directory.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

impl Entry {
    /// Icon markup for this entry: folder for directories, otherwise looked
    /// up by lowercase extension, falling back to a generic icon.
    pub fn icon(&self) -> &'static str {
        if self.is_dir {
            return FOLDER_ICON;
        }
        let ext = Path::new(&self.name)
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("mp4" | "mkv" | "avi" | "ogm") => VIDEO_ICON,
            Some("epub" | "mobi" | "azw3") => BOOK_ICON,
            Some("mp3") => MUSIC_ICON,
            _ => UNKNOWN_ICON,
        }
    }
}

/// Read the immediate children of `dir`, dotfiles excluded, naturally sorted.
pub fn read_listing(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type()?.is_dir();
        entries.push(Entry { name, is_dir });
    }
    entries.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    Ok(entries)
}

/// Case-insensitive, numeric-aware ordering: `a1 < a2 < a10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            // Equivalent under folding; fall back to the raw strings so the
            // ordering stays total.
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let run_a = take_digits(&mut left);
                let run_b = take_digits(&mut right);
                let ordering = cmp_digit_runs(&run_a, &run_b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x
                    .to_ascii_lowercase()
                    .cmp(&y.to_ascii_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Compare digit runs by numeric value without parsing into a fixed-width
/// integer: strip leading zeros, then shorter means smaller.
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Entity-escape text for embedding in markup. Applied to every displayed
/// name and href.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Top-level index: one folder link per registered root.
pub fn render_index<'a>(title: &str, roots: impl Iterator<Item = &'a str>) -> String {
    let listing = roots
        .map(|name| {
            let name = escape_html(name);
            format!("<span class='item'>{FOLDER_ICON} <a href=\"/{name}\">{name}</a></span>")
        })
        .collect::<Vec<_>>()
        .join("<br>\n");
    let title = escape_html(title);
    render_page(&title, &format!("<h2>{title}</h2>\n{listing}"))
}

/// Directory page: title with a parent link, a download-entire-directory
/// link, then one icon+link line per entry. `base` is the URL path of the
/// directory itself, starting with `/` and without a trailing slash; all
/// hrefs are emitted absolute so trailing-slash handling cannot break them.
pub fn render_listing(title: &str, base: &str, entries: &[Entry]) -> String {
    let parent = match base.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => base[..i].to_string(),
    };

    let mut body = format!(
        "<h2>{} <a href=\"{}\">\u{21a9}</a></h2>\n",
        escape_html(title),
        escape_html(&parent)
    );
    body.push_str(&format!(
        "<a href=\"{}?tar\">{SAVE_DIR_ICON} Download entire directory</a><br><br>\n",
        escape_html(base)
    ));
    let lines = entries
        .iter()
        .map(|entry| {
            let href = escape_html(&format!("{base}/{}", entry.name));
            let name = escape_html(&entry.name);
            format!(
                "<span class='item'>{} <a href=\"{href}\">{name}</a></span>",
                entry.icon()
            )
        })
        .collect::<Vec<_>>()
        .join("<br>\n");
    body.push_str(&lines);

    render_page(&escape_html(title), &body)
}

fn render_page(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang='en'>
<head>
  <meta charset="utf-8" />
  <title>{title}</title>
  <style>
  html {{
    padding: 1em;
    margin: auto;
    line-height: 1.5;
    font-size: 1.1em;
  }}
  h2 {{
    margin-top: 0em;
  }}
  a {{
    color: inherit;
    text-decoration: none;
  }}
  a:hover {{
    text-decoration: underline;
  }}
  svg {{
    vertical-align: text-top;
  }}
  </style>
</head>
<body>
{body}
"#
    )
}
