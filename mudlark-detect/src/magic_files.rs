//! File-type detection through libmagic, with a curated description
//! blocklist.
//!
//! libmagic is eager: short binary payloads match all sorts of exotic
//! formats. The blocklist below is data, not logic. It was curated against
//! real chain payloads, and the exact substrings matter. After the
//! blocklist, a handful of noisy descriptions are normalized to stable
//! phrasings so the histogram buckets them together.

use magic::cookie::{DatabasePaths, Flags};

use crate::Error;

/// Descriptions rejected outright.
const BLOCKLIST_EXACT: [&str; 3] = ["data", "shared library", "(non-conforming)"];

/// Any description containing one of these substrings is a known false
/// positive.
const BLOCKLIST_SUBSTRINGS: &[&str] = &[
    "title:",
    "ddis/ddif",
    "Message Sequence",
    "rawbits",
    "Binary II",
    "ZPAQ stream",
    "QL disk",
    "LN03 output",
    "LADS",
    "XWD X",
    "Smile",
    "Nintendo",
    "Kerberos",
    "AMF",
    "ctors/track",
    "ICE authority",
    "SAS",
    "Stereo",
    "ddis/dtif",
    "Virtual TI skin",
    "Multitracker",
    "HP s200",
    "ECMA-363",
    "Monaural",
    "32 kHz",
    "48 kHz",
    "locale archive",
    "terminfo",
    "GRand",
    "font",
    "Apache",
    "OEM-ID",
    "Bentley",
    "huf output",
    "disk quotas",
    "PRCS",
    "PEX",
    "C64",
    "lif file",
    "GHost image",
    "Linux",
    "amd",
    "XENIX",
    "structured file",
    "gfxboot",
    "X11",
    "cpio",
    "Squeezed",
    "compacted",
    "Quasijarus",
    "JVT",
    "Poskanzer",
    "VISX",
    "TIM",
    "PCX",
    "MSVC",
    "LZH",
    "LVM1",
    "Encore",
    "ATSC",
    "BASIC",
    "frozen file",
    "dBase",
    "SCO",
    "RDI",
    "PostScript",
    "Netpbm",
    "Maple",
    "i386",
    "archive data",
    "Motorola",
    "FoxPro",
    "packed data",
    "fsav",
    "crunched",
    "compress'd",
    "Terse",
    "SoftQuad",
    "Sendmail",
    "OS9",
    "MySQL",
    "IRIS",
    "Java",
    "SOFF",
    "PSI ",
    "Clarion",
    "BIOS",
    "Atari",
    "Ai32",
    "ALAN",
    "44.1",
    "Microsoft",
    "TeX",
    "floppy",
    "GLF_BINARY",
    "AIN",
    "Alpha",
    "vfont",
    "DOS",
    "Sun disk",
    "Group 3",
    "Logitech",
    "Solitaire",
    "old ",
    "SYMMETRY",
    "DOS/MBR",
    "Amiga",
    "mumps",
    "ID tags",
    "GLS",
    "dBase IV DBT",
    "TTComp",
    "EBCDIC",
    "MGR bitmap",
    "CLIPPER",
    "Dyalog",
    "PARIX",
    "AIX",
    "SysEx",
    "ARJ",
    "Applesoft",
    "GeoSwath",
    "ISO-8859",
    "YAC",
    "capture file",
    "COFF",
    "locale data table",
    "Ucode",
    "PDP",
    "LXT",
    "Tower",
    "SGI",
    "BS",
    "exe",
    "curses",
    "endian",
    "byte",
    "ASCII",
];

/// Substring-triggered rewrites applied after the blocklist, first match
/// wins.
const NORMALIZATIONS: &[(&str, &str)] = &[
    ("mcrypt", "mcrypt encrypted data"),
    ("MPEG", "MPEG stream"),
    ("RLE image", "RLE image data"),
    ("gzip compressed data", "gzip compressed data"),
    ("GPG key public", "GPG public key ring"),
    ("PGP Secret", "PGP Secret key"),
    ("PGP\\011Secret", "PGP Secret key"),
    ("PGP symmetric", "PGP symmetric key encrypted data"),
    ("Bio-Rad", "Bio-Rad .PIC Image File"),
    ("Targa", "Targa image data"),
];

/// Apply blocklist and normalizations to a raw libmagic description.
pub fn filter_description(description: String) -> Option<String> {
    if BLOCKLIST_EXACT.contains(&description.as_str()) {
        return None;
    }
    if BLOCKLIST_SUBSTRINGS
        .iter()
        .any(|noise| description.contains(noise))
    {
        return None;
    }
    for (needle, replacement) in NORMALIZATIONS {
        if description.contains(needle) {
            return Some((*replacement).to_owned());
        }
    }
    Some(description)
}

pub struct MagicDetector {
    cookie: magic::Cookie<magic::cookie::Load>,
}

impl MagicDetector {
    /// Load the system magic database.
    pub fn new() -> Result<Self, Error> {
        let cookie =
            magic::Cookie::open(Flags::empty()).map_err(|err| Error::Magic(err.to_string()))?;
        let cookie = cookie
            .load(&DatabasePaths::default())
            .map_err(|err| Error::Magic(err.to_string()))?;
        Ok(Self { cookie })
    }

    /// Describe a payload, or nothing if it is too short, unidentifiable,
    /// or a known false positive.
    pub fn describe(&self, data: &[u8]) -> Option<String> {
        if data.len() < 8 {
            return None;
        }
        let mut description = self.cookie.buffer(data).ok()?;
        if description == "data" {
            // A framing byte may hide the real signature.
            description = self.cookie.buffer(data.get(1..)?).ok()?;
        }
        filter_description(description)
    }
}
