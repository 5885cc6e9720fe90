use encoding_rs::GBK;
use std::borrow::Cow;

/// Character encoding used to turn text payloads into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Ascii,
    Utf8,
    Utf16,
    Gbk,
}

impl std::str::FromStr for TextEncoding {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ASCII" => Self::Ascii,
            "UTF-8" => Self::Utf8,
            "UTF-16" => Self::Utf16,
            "GBK" | "GB2312" => Self::Gbk,
            _ => return Err(()),
        })
    }
}

impl TextEncoding {
    /// Characters the encoding cannot represent become `?`.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            Self::Utf8 => Cow::Borrowed(text.as_bytes()),
            Self::Ascii if text.is_ascii() => Cow::Borrowed(text.as_bytes()),
            Self::Ascii => Cow::Owned(
                text.chars()
                    .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                    .collect(),
            ),
            Self::Utf16 => Cow::Owned(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Self::Gbk => encode_gbk(text),
        }
    }
}

fn encode_gbk(text: &str) -> Cow<'_, [u8]> {
    let (bytes, _, had_errors) = GBK.encode(text);
    if !had_errors {
        return bytes;
    }

    // encoding_rs writes unmappable characters as HTML numeric references.
    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let (encoded, _, bad) = GBK.encode(c.encode_utf8(&mut buf));
        if bad {
            out.push(b'?');
        } else {
            out.extend_from_slice(&encoded);
        }
    }
    Cow::Owned(out)
}
