//! `multipart/form-data` body decoding.
//!
//! Parts are split on `--<boundary>`; per-part headers accept both CRLFCRLF
//! and LFLF terminators. `name` and `filename` use quoted-string semantics
//! and filenames are reduced to their basename to block path traversal.

pub struct Part<'a> {
    pub name: Option<&'a str>,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

pub struct Multipart<'a> {
    body: &'a [u8],
    marker: Vec<u8>,
}

impl<'a> Multipart<'a> {
    pub fn new(body: &'a [u8], boundary: &str) -> Self {
        let mut marker = Vec::with_capacity(boundary.len() + 2);
        marker.extend_from_slice(b"--");
        marker.extend_from_slice(boundary.as_bytes());
        Self { body, marker }
    }

    fn find(data: &[u8], needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        data.windows(needle.len()).position(|w| w == needle)
    }
}

impl<'a> Iterator for Multipart<'a> {
    type Item = Part<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.is_empty() {
            return None;
        }

        let mut start = Self::find(self.body, &self.marker)? + self.marker.len();

        // "--" after the boundary marks the end of the body.
        if self.body[start..].starts_with(b"--") {
            self.body = &[];
            return None;
        }
        if self.body[start..].starts_with(b"\r\n") {
            start += 2;
        } else if self.body[start..].starts_with(b"\n") {
            start += 1;
        }

        let rest = &self.body[start..];
        let (header_end, sep_len) = match (Self::find(rest, b"\r\n\r\n"), Self::find(rest, b"\n\n")) {
            (Some(crlf), Some(lf)) if lf < crlf => (lf, 2),
            (Some(crlf), _) => (crlf, 4),
            (None, Some(lf)) => (lf, 2),
            (None, None) => {
                self.body = &[];
                return None;
            }
        };
        let header_slice = &rest[..header_end];
        let body_start = start + header_end + sep_len;

        let body_end = match Self::find(&self.body[body_start..], &self.marker) {
            Some(pos) => body_start + pos,
            None => {
                // No closing boundary: the part is truncated, stop here.
                self.body = &[];
                return None;
            }
        };

        // The part body ends with the line break that precedes the boundary.
        let mut actual_end = body_end;
        if actual_end >= 2 && &self.body[actual_end - 2..actual_end] == b"\r\n" {
            actual_end -= 2;
        } else if actual_end >= 1 && self.body[actual_end - 1] == b'\n' {
            actual_end -= 1;
        }
        let body_slice = &self.body[body_start..actual_end];

        self.body = &self.body[body_end..];

        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        if let Ok(headers) = std::str::from_utf8(header_slice) {
            for line in headers.split('\n') {
                let line = line.trim_end_matches('\r');
                let lower = line.to_ascii_lowercase();
                if lower.starts_with("content-disposition:") {
                    (name, filename) = disposition_params(line);
                } else if lower.starts_with("content-type:") {
                    content_type = Some(line["content-type:".len()..].trim());
                }
            }
        }

        Some(Part {
            name,
            filename,
            content_type,
            body: body_slice,
        })
    }
}

/// Extract `name` and `filename` from a Content-Disposition line, honoring
/// quoted-string values.
fn disposition_params(line: &str) -> (Option<&str>, Option<&str>) {
    let mut name = None;
    let mut filename = None;
    for segment in line.split(';').skip(1) {
        let segment = segment.trim();
        if let Some(rest) = segment.strip_prefix("filename=") {
            filename = Some(unquote(rest));
        } else if let Some(rest) = segment.strip_prefix("name=") {
            name = Some(unquote(rest));
        }
    }
    (name, filename)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Reduce an uploaded filename to its basename so it can never traverse
/// directories, whatever the client's path separator.
pub fn sanitize_filename(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}
