//! Image-header sniffing: the classic magic-number checks for the seven
//! formats worth reporting, with a retry that strips one lead byte since
//! Monero and Bitcoin payloads often carry a framing byte up front.

fn test_jpeg(h: &[u8]) -> bool {
    matches!(h.get(6..10), Some(b"JFIF") | Some(b"Exif"))
}

fn test_png(h: &[u8]) -> bool {
    h.starts_with(b"\x89PNG\r\n\x1a\n")
}

fn test_gif(h: &[u8]) -> bool {
    h.starts_with(b"GIF87a") || h.starts_with(b"GIF89a")
}

fn test_tiff(h: &[u8]) -> bool {
    matches!(h.get(..2), Some(b"MM") | Some(b"II"))
}

fn test_bmp(h: &[u8]) -> bool {
    h.starts_with(b"BM")
}

fn test_webp(h: &[u8]) -> bool {
    h.starts_with(b"RIFF") && h.get(8..12) == Some(b"WEBP")
}

fn test_pnm(h: &[u8]) -> Option<&'static str> {
    let format = match h.get(..2)? {
        b"P1" | b"P4" => "pbm",
        b"P2" | b"P5" => "pgm",
        b"P3" | b"P6" => "ppm",
        _ => return None,
    };
    matches!(h.get(2), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')).then_some(format)
}

/// Identify an image by its header bytes.
pub fn sniff(data: &[u8]) -> Option<&'static str> {
    if test_jpeg(data) {
        return Some("jpeg");
    }
    if test_png(data) {
        return Some("png");
    }
    if test_gif(data) {
        return Some("gif");
    }
    if test_tiff(data) {
        return Some("tiff");
    }
    if test_bmp(data) {
        return Some("bmp");
    }
    if test_webp(data) {
        return Some("webp");
    }
    test_pnm(data)
}

/// Sniff, then once more with a potential framing byte removed.
pub fn sniff_with_retry(data: &[u8]) -> Option<&'static str> {
    sniff(data).or_else(|| data.get(1..).and_then(sniff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_the_seven_families() {
        let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];
        jpeg.extend(b"JFIF\x00");
        assert_eq!(sniff(&jpeg), Some("jpeg"));

        assert_eq!(sniff(b"\x89PNG\r\n\x1a\nrest"), Some("png"));
        assert_eq!(sniff(b"GIF89a......"), Some("gif"));
        assert_eq!(sniff(b"II*\x00body"), Some("tiff"));
        assert_eq!(sniff(b"BM\x00\x00"), Some("bmp"));
        assert_eq!(sniff(b"RIFF\x10\x00\x00\x00WEBPVP8 "), Some("webp"));
        assert_eq!(sniff(b"P6 640 480 255\n"), Some("ppm"));
        assert_eq!(sniff(b"P1\n# bitmap"), Some("pbm"));
        assert_eq!(sniff(b"P5\t"), Some("pgm"));
    }

    #[test]
    fn garbage_yields_nothing() {
        assert_eq!(sniff(b""), None);
        assert_eq!(sniff(b"\x00\x01\x02\x03\x04\x05\x06\x07"), None);
        assert_eq!(sniff(b"P9 "), None);
    }

    #[test]
    fn retry_strips_one_framing_byte() {
        let mut framed = vec![0x01];
        framed.extend(b"\x89PNG\r\n\x1a\n");
        assert_eq!(sniff(&framed), None);
        assert_eq!(sniff_with_retry(&framed), Some("png"));
    }
}
