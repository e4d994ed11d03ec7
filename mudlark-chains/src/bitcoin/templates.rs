//! Standard-form predicates for Bitcoin scripts.
//!
//! A `true` from any of these means "protocol-typical, do not store". The
//! predicates are deliberately shape-based: they look at encodings, not at
//! whether signatures verify. A script the tokenizer cannot parse is never
//! standard.

use mudlark_codec::script::{
    self, opcode_count, Token, OP_0, OP_1, OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUAL,
    OP_EQUALVERIFY, OP_HASH160,
};

/// DER-encoded ECDSA signature with the trailing sighash byte.
fn is_der_sig(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig[0] != 0x30 || sig[2] != 0x02 {
        return false;
    }
    let len_r = usize::from(sig[3]);
    if sig.get(3 + len_r + 1) != Some(&0x02) {
        return false;
    }
    let Some(&len_s) = sig.get(3 + len_r + 2) else {
        return false;
    };
    sig.len() == 4 + len_r + 2 + usize::from(len_s) + 1
}

/// SEC-serialized public key: 33 bytes compressed or 65 uncompressed.
fn is_sec_pubkey(key: &[u8]) -> bool {
    match key.first() {
        Some(0x02) | Some(0x03) => key.len() == 33,
        Some(0x04) => key.len() == 65,
        _ => false,
    }
}

/// `count` SEC keys packed as a redeem-script body, each preceded by its
/// push opcode (so the stride is key length + 1).
fn are_sec_pubkeys(keys: &[u8], count: usize) -> bool {
    if keys.len() < 33 {
        return false;
    }
    let mut pos = 0usize;
    for _ in 0..count {
        match keys.get(pos) {
            Some(0x02) | Some(0x03) => pos += 34,
            Some(0x04) => pos += 66,
            _ => return false,
        }
    }
    true
}

/// `<sig>`
pub fn is_p2pk_input(script_sig: &[u8]) -> bool {
    if script_sig.len() < 64 {
        return false;
    }
    let Ok(tokens) = script::tokenize(script_sig) else {
        return false;
    };
    match tokens.as_slice() {
        [Token::Push(sig)] => sig.len() >= 64 && is_der_sig(sig),
        _ => false,
    }
}

/// `<sig> <pubkey>`
pub fn is_p2pkh_input(script_sig: &[u8]) -> bool {
    if script_sig.len() < 96 {
        return false;
    }
    let Ok(tokens) = script::tokenize(script_sig) else {
        return false;
    };
    match tokens.as_slice() {
        [Token::Push(sig), Token::Push(key)] => {
            is_der_sig(sig) && key.len() > 32 && is_sec_pubkey(key)
        }
        _ => false,
    }
}

/// `OP_0 <sigs> <redeem script>` where the redeem script is
/// `OP_m <pubkeys> OP_n OP_CHECKMULTISIG` with n keys between the counters.
pub fn is_p2sh_p2ms_input(script_sig: &[u8]) -> bool {
    if script_sig.len() < 96 {
        return false;
    }
    let Ok(tokens) = script::tokenize(script_sig) else {
        return false;
    };
    let Some((Token::Op(OP_0), rest)) = tokens.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }

    let mut saw_redeem = false;
    for token in rest {
        let Some(data) = token.push_data() else {
            return false;
        };
        if data.is_empty() {
            return false;
        }
        if let Some(_m) = opcode_count(data[0]) {
            // Redeem script.
            if data.len() < 4 || data[data.len() - 1] != OP_CHECKMULTISIG {
                return false;
            }
            let Some(n) = opcode_count(data[data.len() - 2]) else {
                return false;
            };
            // Skip OP_m and the first key's push opcode; the per-key
            // stride accounts for the rest.
            if !are_sec_pubkeys(&data[2..data.len() - 2], usize::from(n)) {
                return false;
            }
            saw_redeem = true;
        } else if !is_der_sig(data) {
            return false;
        }
    }
    saw_redeem
}

/// `OP_0 <20-byte hash>` wrapped for P2SH: 23 bytes, second byte zero.
pub fn is_p2sh_p2wpkh_input(script_sig: &[u8]) -> bool {
    script_sig.len() == 23 && script_sig[1] == 0x00
}

/// Any of the four standard input shapes.
pub fn is_standard_input(script_sig: &[u8]) -> bool {
    is_p2pk_input(script_sig)
        || is_p2pkh_input(script_sig)
        || is_p2sh_p2ms_input(script_sig)
        || is_p2sh_p2wpkh_input(script_sig)
}

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn is_p2pkh_output(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

/// `<pubkey> OP_CHECKSIG`
pub fn is_p2pk_output(script: &[u8]) -> bool {
    if script.len() < 33 {
        return false;
    }
    let Ok(tokens) = script::tokenize(script) else {
        return false;
    };
    match tokens.as_slice() {
        [Token::Push(key), Token::Op(OP_CHECKSIG)] => is_sec_pubkey(key),
        _ => false,
    }
}

/// `OP_HASH160 <20> OP_EQUAL`
pub fn is_p2sh_output(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 20 && script[22] == OP_EQUAL
}

/// `OP_m <pubkeys> OP_n OP_CHECKMULTISIG`, key count matching OP_n.
pub fn is_p2ms_output(script: &[u8]) -> bool {
    if script.len() < 33 {
        return false;
    }
    let Ok(tokens) = script::tokenize(script) else {
        return false;
    };
    if tokens.len() < 4 {
        return false;
    }
    let (Token::Op(first), Token::Op(check)) = (&tokens[0], &tokens[tokens.len() - 1]) else {
        return false;
    };
    if *check != OP_CHECKMULTISIG {
        return false;
    }
    let Some(m) = opcode_count(*first) else {
        return false;
    };
    let Token::Op(counter) = tokens[tokens.len() - 2] else {
        return false;
    };
    let Some(n) = opcode_count(counter) else {
        return false;
    };
    let keys = &tokens[1..tokens.len() - 2];
    if keys.len() != usize::from(n) || m > n {
        return false;
    }
    keys.iter()
        .all(|token| token.push_data().is_some_and(is_sec_pubkey))
}

/// `OP_0 <20>`
pub fn is_p2wpkh_output(script: &[u8]) -> bool {
    script.len() == 22 && script[0] == OP_0
}

/// `OP_0 <32>`
pub fn is_p2wsh_output(script: &[u8]) -> bool {
    script.len() == 34 && script[0] == OP_0
}

/// `OP_1 <32-byte x-only key>`
pub fn is_p2tr_output(script: &[u8]) -> bool {
    script.len() == 34 && script[0] == OP_1
}

/// Any of the seven standard output shapes.
pub fn is_standard_output(script: &[u8]) -> bool {
    is_p2pkh_output(script)
        || is_p2pk_output(script)
        || is_p2sh_output(script)
        || is_p2ms_output(script)
        || is_p2wpkh_output(script)
        || is_p2wsh_output(script)
        || is_p2tr_output(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudlark_codec::script::OP_RETURN;

    /// A DER signature of the given r/s widths plus the sighash byte.
    fn der_sig(len_r: u8, len_s: u8) -> Vec<u8> {
        let total = 2 + usize::from(len_r) + 2 + usize::from(len_s);
        let mut sig = vec![0x30, total as u8, 0x02, len_r];
        sig.extend(std::iter::repeat(0x11).take(usize::from(len_r)));
        sig.extend([0x02, len_s]);
        sig.extend(std::iter::repeat(0x22).take(usize::from(len_s)));
        sig.push(0x01);
        sig
    }

    fn push(data: &[u8], out: &mut Vec<u8>) {
        out.push(data.len() as u8);
        out.extend_from_slice(data);
    }

    fn compressed_key(fill: u8) -> Vec<u8> {
        let mut key = vec![0x02];
        key.extend([fill; 32]);
        key
    }

    #[test]
    fn p2pk_input_matches() {
        let mut script = Vec::new();
        push(&der_sig(32, 32), &mut script);
        assert!(is_p2pk_input(&script));
        assert!(is_standard_input(&script));
    }

    #[test]
    fn p2pkh_input_matches() {
        let mut script = Vec::new();
        push(&der_sig(33, 32), &mut script);
        push(&compressed_key(0xab), &mut script);
        assert!(is_p2pkh_input(&script));

        // Same shape with a mangled pubkey prefix is not standard.
        let mut bad = Vec::new();
        push(&der_sig(33, 32), &mut bad);
        let mut key = compressed_key(0xab);
        key[0] = 0x07;
        push(&key, &mut bad);
        assert!(!is_p2pkh_input(&bad));
    }

    fn p2ms_redeem(n: u8) -> Vec<u8> {
        let mut redeem = vec![OP_1];
        for i in 0..n {
            push(&compressed_key(i), &mut redeem);
        }
        redeem.push(OP_1 + n - 1);
        redeem.push(OP_CHECKMULTISIG);
        redeem
    }

    #[test]
    fn p2sh_p2ms_input_matches() {
        let mut script = vec![OP_0];
        push(&der_sig(32, 32), &mut script);
        push(&p2ms_redeem(2), &mut script);
        assert!(is_p2sh_p2ms_input(&script));
        assert!(is_standard_input(&script));
    }

    #[test]
    fn p2sh_p2ms_input_requires_redeem_script() {
        let mut script = vec![OP_0];
        push(&der_sig(32, 32), &mut script);
        push(&der_sig(32, 33), &mut script);
        assert!(!is_p2sh_p2ms_input(&script));
    }

    #[test]
    fn p2sh_p2wpkh_input_matches() {
        let mut script = vec![22, 0x00, 20];
        script.extend([0x55; 20]);
        assert_eq!(script.len(), 23);
        assert!(is_p2sh_p2wpkh_input(&script));
    }

    #[test]
    fn p2pkh_output_matches() {
        let mut script = vec![OP_DUP, OP_HASH160, 20];
        script.extend([0xaa; 20]);
        script.extend([OP_EQUALVERIFY, OP_CHECKSIG]);
        assert!(is_p2pkh_output(&script));
        assert!(is_standard_output(&script));
    }

    #[test]
    fn p2pk_output_matches() {
        let mut script = Vec::new();
        push(&compressed_key(0x01), &mut script);
        script.push(OP_CHECKSIG);
        assert!(is_p2pk_output(&script));

        let mut uncompressed = Vec::new();
        let mut key = vec![0x04];
        key.extend([0x33; 64]);
        push(&key, &mut uncompressed);
        uncompressed.push(OP_CHECKSIG);
        assert!(is_p2pk_output(&uncompressed));
    }

    #[test]
    fn p2sh_output_matches() {
        let mut script = vec![OP_HASH160, 20];
        script.extend([0xcd; 20]);
        script.push(OP_EQUAL);
        assert!(is_p2sh_output(&script));
    }

    #[test]
    fn p2ms_output_requires_matching_count() {
        let mut script = vec![OP_1];
        push(&compressed_key(0x01), &mut script);
        push(&compressed_key(0x02), &mut script);
        script.push(OP_1 + 1);
        script.push(OP_CHECKMULTISIG);
        assert!(is_p2ms_output(&script));

        // OP_3 with only two keys: count mismatch, kept for storage.
        let mut mismatched = vec![OP_1];
        push(&compressed_key(0x01), &mut mismatched);
        push(&compressed_key(0x02), &mut mismatched);
        mismatched.push(OP_1 + 2);
        mismatched.push(OP_CHECKMULTISIG);
        assert!(!is_p2ms_output(&mismatched));
    }

    #[test]
    fn witness_and_taproot_outputs() {
        let mut p2wpkh = vec![OP_0, 20];
        p2wpkh.extend([0x66; 20]);
        assert!(is_p2wpkh_output(&p2wpkh));

        let mut p2wsh = vec![OP_0, 32];
        p2wsh.extend([0x77; 32]);
        assert!(is_p2wsh_output(&p2wsh));

        let mut p2tr = vec![OP_1, 32];
        p2tr.extend([0x88; 32]);
        assert!(is_p2tr_output(&p2tr));
        assert!(!is_p2wsh_output(&p2tr));
    }

    #[test]
    fn op_return_is_not_standard() {
        let mut script = vec![OP_RETURN, 5];
        script.extend(b"Hello");
        assert!(!is_standard_output(&script));
    }

    #[test]
    fn truncated_script_is_not_standard() {
        // Promises a 30-byte push but ends early.
        assert!(!is_standard_output(&[0x1e, 0x01, 0x02]));
        assert!(!is_standard_input(&[0x1e, 0x01, 0x02]));
    }
}
