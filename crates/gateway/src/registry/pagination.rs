//! Offset-based list pagination.
//!
//! Page tokens are opaque to callers: a base64 wrapper around the next
//! offset. List implementations fetch `page_size + 1` items; an overflow
//! means another page exists and yields the next token.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::error::Error;

/// Page size applied when the caller passes zero.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Parsed page token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageToken {
    pub offset: usize,
}

impl PageToken {
    /// Decode a caller-supplied token; the empty token is offset zero.
    pub fn parse(token: &str) -> crate::Result<Self> {
        if token.is_empty() {
            return Ok(Self { offset: 0 });
        }

        let invalid = || Error::InvalidRequest(format!("invalid page token: '{token}'"));

        let decoded = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;

        let offset = decoded
            .strip_prefix("o:")
            .and_then(|offset| offset.parse::<usize>().ok())
            .ok_or_else(invalid)?;

        Ok(Self { offset })
    }

    /// Encode the token pointing at `offset`.
    pub fn encode(offset: usize) -> String {
        URL_SAFE_NO_PAD.encode(format!("o:{offset}"))
    }
}

/// Slice one page out of a name-sorted snapshot.
///
/// Returns the page plus the next token, empty when the listing is
/// exhausted.
pub fn paginate<T: Clone>(items: &[T], page_size: u32, page_token: &str) -> crate::Result<(Vec<T>, String)> {
    let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size } as usize;
    let offset = PageToken::parse(page_token)?.offset;

    if offset >= items.len() {
        return Ok((Vec::new(), String::new()));
    }

    // Fetch one past the page: an overflow item proves another page exists.
    let window = &items[offset..items.len().min(offset + page_size + 1)];

    if window.len() > page_size {
        let page = window[..page_size].to_vec();
        Ok((page, PageToken::encode(offset + page_size)))
    } else {
        Ok((window.to_vec(), String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;

    #[test]
    fn token_round_trip() {
        let token = PageToken::encode(42);
        assert_eq!(PageToken::parse(&token).unwrap().offset, 42);
        assert_eq!(PageToken::parse("").unwrap().offset, 0);
    }

    #[test]
    fn garbage_tokens_are_invalid_argument() {
        for bad in ["???", &URL_SAFE_NO_PAD.encode("o:nan"), &URL_SAFE_NO_PAD.encode("offset=42")] {
            let err = PageToken::parse(bad).unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{bad}");
        }
    }

    #[test]
    fn walks_every_item_exactly_once() {
        let items: Vec<u32> = (1..=5).collect();

        let (page, token) = paginate(&items, 2, "").unwrap();
        assert_eq!(page, vec![1, 2]);
        assert!(!token.is_empty());

        let (page, token) = paginate(&items, 2, &token).unwrap();
        assert_eq!(page, vec![3, 4]);
        assert!(!token.is_empty());

        let (page, token) = paginate(&items, 2, &token).unwrap();
        assert_eq!(page, vec![5]);
        assert!(token.is_empty());
    }

    #[test]
    fn exact_multiple_does_not_emit_a_phantom_page() {
        let items: Vec<u32> = (1..=4).collect();

        let (page, token) = paginate(&items, 2, "").unwrap();
        assert_eq!(page, vec![1, 2]);

        let (page, token) = paginate(&items, 2, &token).unwrap();
        assert_eq!(page, vec![3, 4]);
        assert!(token.is_empty());
    }

    #[test]
    fn offset_past_the_end_is_an_empty_page() {
        let items: Vec<u32> = (1..=3).collect();
        let token = PageToken::encode(10);

        let (page, token) = paginate(&items, 2, &token).unwrap();
        assert!(page.is_empty());
        assert!(token.is_empty());
    }
}
