/// Envelope code signalling a successful API call.
pub const SUCCESS_CODE: i32 = 20000;

/// Response header carrying a refreshed access token.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Path segment that marks a stored multipart chunk in an object key.
const CHUNKS_SEGMENT: &str = "chunks";

/// Extracts the part number from a stored chunk's object key.
///
/// Keys look like `{uid}/chunks/{uploadId}/{partNumber}`. Any other shape,
/// or a part number that is not a positive integer, yields `None`.
pub fn part_number_from_object_key(object_key: &str) -> Option<u32> {
    let mut segments = object_key.split('/');
    let _uid = segments.next()?;
    if segments.next()? != CHUNKS_SEGMENT {
        return None;
    }
    let _upload_id = segments.next()?;
    let part = segments.next()?.parse::<u32>().ok()?;
    (part > 0).then_some(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_key() {
        assert_eq!(part_number_from_object_key("42/chunks/up-1/7"), Some(7));
    }

    #[test]
    fn ignores_trailing_segments() {
        assert_eq!(part_number_from_object_key("42/chunks/up-1/3/extra"), Some(3));
    }

    #[test]
    fn rejects_wrong_marker() {
        assert_eq!(part_number_from_object_key("42/files/up-1/7"), None);
    }

    #[test]
    fn rejects_short_key() {
        assert_eq!(part_number_from_object_key("42/chunks/up-1"), None);
        assert_eq!(part_number_from_object_key(""), None);
    }

    #[test]
    fn rejects_non_numeric_and_zero() {
        assert_eq!(part_number_from_object_key("42/chunks/up-1/abc"), None);
        assert_eq!(part_number_from_object_key("42/chunks/up-1/0"), None);
    }
}
