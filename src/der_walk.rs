//! Minimal recursive DER TLV walker used to pull embedded certificates out
//! of a PKCS#7 signed-data bundle without modeling the full CMS ASN.1
//! module. Mirrors the byte-level, best-effort scanning style the teacher
//! uses for PEM block extraction in `crl_cache.rs::parse_crl_data` — here
//! applied to DER TLVs instead of PEM lines.

/// Read one BER/DER tag-length-value header at `pos`, returning
/// `(tag, content_start, content_end)` where `content_end` is exclusive.
/// Indefinite-length encodings (not valid DER) are rejected.
fn read_tlv(data: &[u8], pos: usize) -> Option<(u8, usize, usize)> {
    let tag = *data.get(pos)?;
    let mut idx = pos + 1;
    let len_byte = *data.get(idx)?;
    idx += 1;

    let content_len = if len_byte & 0x80 == 0 {
        len_byte as usize
    } else {
        let num_bytes = (len_byte & 0x7f) as usize;
        if num_bytes == 0 || num_bytes > 8 {
            return None; // indefinite-length or implausibly large, not DER
        }
        if idx + num_bytes > data.len() {
            return None;
        }
        let mut len = 0usize;
        for b in &data[idx..idx + num_bytes] {
            len = (len << 8) | *b as usize;
        }
        idx += num_bytes;
        len
    };

    let content_start = idx;
    let content_end = content_start.checked_add(content_len)?;
    if content_end > data.len() {
        return None;
    }
    Some((tag, content_start, content_end))
}

const MAX_RECURSION_DEPTH: u32 = 24;

/// Recursively scans `data` for DER-encoded sub-structures that parse
/// successfully as an X.509 certificate (via `try_parse`), in the order
/// they appear. Used to extract certificates from a PKCS#7 SignedData
/// bundle without needing to model its exact field layout.
pub fn collect_der_certificates(
    data: &[u8],
    try_parse: &dyn Fn(&[u8]) -> bool,
    out: &mut Vec<Vec<u8>>,
    depth: u32,
) {
    if depth > MAX_RECURSION_DEPTH {
        return;
    }

    let mut pos = 0;
    while pos < data.len() {
        let Some((tag, content_start, content_end)) = read_tlv(data, pos) else {
            break;
        };
        let whole = &data[pos..content_end];
        let constructed = tag & 0x20 != 0;

        if constructed && tag & 0xC0 == 0x00 && try_parse(whole) {
            // A universal constructed type (SEQUENCE/SET) that already
            // parses as a certificate: take it whole, don't descend.
            out.push(whole.to_vec());
        } else if constructed {
            collect_der_certificates(&data[content_start..content_end], try_parse, out, depth + 1);
        }

        pos = content_end;
    }
}
