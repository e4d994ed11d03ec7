//! Printable-string detectors.

use std::io::{Read, Write};
use std::process::{Command, Stdio};

/// 7-bit printable: graphic characters plus conventional whitespace.
pub fn is_printable(byte: u8) -> bool {
    byte.is_ascii_graphic() || matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Length of the longest printable run, if it reaches `min`.
pub fn native_strings(data: &[u8], min: usize) -> Option<usize> {
    let mut longest = 0usize;
    let mut run = 0usize;
    for &byte in data {
        if is_printable(byte) {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    (longest >= min).then_some(longest)
}

/// Same contract, outsourced to the external `strings` utility. The
/// finding length is the length of everything `strings -n <min>` printed,
/// trimmed.
pub fn gnu_strings(data: &[u8], min: usize) -> std::io::Result<Option<usize>> {
    let mut child = Command::new("strings")
        .arg("-n")
        .arg(min.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    // Feed stdin from a helper thread so a large payload cannot deadlock
    // against the unread stdout pipe.
    let writer = child.stdin.take().map(|mut stdin| {
        let payload = data.to_vec();
        std::thread::spawn(move || {
            let _ = stdin.write_all(&payload);
        })
    });

    let mut output = String::new();
    if let Some(stdout) = child.stdout.as_mut() {
        stdout.read_to_string(&mut output)?;
    }
    if let Some(writer) = writer {
        let _ = writer.join();
    }
    child.wait()?;

    let length = output.trim().len();
    Ok((length >= min).then_some(length))
}
