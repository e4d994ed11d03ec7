//! Per-chain file-detection wrappers.
//!
//! Raw payloads are not flat byte soup: a Monero extra is a tag stream, a
//! Bitcoin script frames its pushes. Each wrapper knows where in its
//! chain's payload a file is likely to hide and probes those slices first,
//! falling back to the whole payload.

use mudlark_codec::monero::parse_extra;
use mudlark_codec::script::Tokenizer;

/// A byte detector: some description of the bytes, or nothing.
pub type FileDetector<'d> = &'d dyn Fn(&[u8]) -> Option<String>;

/// Probe a Monero extra field: nonces first, then pubkeys; on a parse
/// failure with a usable offset, the undecodable tail; finally the whole
/// field.
pub fn monero_find_file(data: &[u8], detect: FileDetector) -> Option<String> {
    match parse_extra(data) {
        Ok(extra) => {
            for nonce in &extra.nonces {
                if let Some(found) = detect(nonce) {
                    return Some(found);
                }
            }
            for pubkey in &extra.pubkeys {
                if let Some(found) = detect(pubkey) {
                    return Some(found);
                }
            }
        }
        Err(err) => {
            if let Some(offset) = err.recoverable_offset() {
                if let Some(found) = data.get(offset..).and_then(detect) {
                    return Some(found);
                }
            }
        }
    }
    detect(data)
}

/// Probe a Bitcoin script: the raw script first, then each push on its
/// own. A malformed push ends the push walk; the whole-script probe has
/// already run by then.
pub fn bitcoin_find_file(data: &[u8], detect: FileDetector) -> Option<String> {
    if let Some(found) = detect(data) {
        return Some(found);
    }
    for token in Tokenizer::new(data) {
        let Ok(token) = token else { break };
        let Some(push) = token.push_data() else {
            continue;
        };
        if let Some(found) = detect(push) {
            return Some(found);
        }
    }
    None
}

/// Ethereum calldata carries no framing worth unpacking.
pub fn ethereum_find_file(data: &[u8], detect: FileDetector) -> Option<String> {
    detect(data)
}
