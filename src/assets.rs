use base64::Engine;

/// Stylesheet text made available to `<link>` elements by href.
#[derive(Debug, Clone)]
pub struct StylesheetAsset {
    pub href: String,
    pub css: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    pub assets: Vec<StylesheetAsset>,
}

impl AssetBundle {
    pub fn add(&mut self, href: impl Into<String>, css: impl Into<String>) {
        self.assets.push(StylesheetAsset {
            href: href.into(),
            css: css.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Resolves a link href to stylesheet text: inline `data:` URLs first,
    /// then registered assets. Later registrations win.
    pub fn stylesheet(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        if let Some((mime, data)) = parse_data_uri_bytes(href) {
            if !mime.contains("css") {
                return None;
            }
            return Some(String::from_utf8_lossy(&data).into_owned());
        }
        let wanted = normalize_href(href);
        self.assets
            .iter()
            .rev()
            .find(|asset| normalize_href(&asset.href) == wanted)
            .map(|asset| asset.css.clone())
    }
}

fn normalize_href(href: &str) -> &str {
    href.trim().trim_start_matches("./")
}

pub(crate) fn css_data_uri(css: &str) -> String {
    format!(
        "data:text/css;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(css.as_bytes())
    )
}

pub(crate) fn parse_data_uri_bytes(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("text/plain")
        .to_ascii_lowercase();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.as_bytes())
            .ok()?
    } else {
        decode_percent_encoded_bytes(payload)?
    };
    Some((mime, data))
}

fn decode_percent_encoded_bytes(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return None;
                }
                let hi = hex_nibble(bytes[i + 1])?;
                let lo = hex_nibble(bytes[i + 2])?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(out)
}

fn hex_nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}
