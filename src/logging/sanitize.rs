//! Log sanitization helpers.
//!
//! Full deal ids and escrow addresses in logs allow correlation between the
//! platform's records and on-chain activity. These helpers truncate
//! identifiers enough for debugging without revealing the full value.

/// Sanitize a deal id for logs.
///
/// Format: "abc12345...90ef" (first 8 + last 4 chars).
pub fn sanitize_deal_id(id: &str) -> String {
    if id.len() < 12 {
        return "<invalid-id>".to_string();
    }
    format!("{}...{}", &id[..8], &id[id.len() - 4..])
}

/// Sanitize a TON address for logs.
///
/// Format: "0:ab...f12" (first 4 + last 3 chars). The workchain prefix stays
/// visible so misrouted addresses are still diagnosable.
pub fn sanitize_address(address: &str) -> String {
    if address.len() < 8 {
        return "<invalid-address>".to_string();
    }
    format!("{}...{}", &address[..4], &address[address.len() - 3..])
}

/// Sanitize a nano-TON amount for logs.
///
/// Rounds to 2 decimals so the exact payment cannot be matched on-chain.
pub fn sanitize_amount(nano: i64) -> String {
    let ton = nano as f64 / 1_000_000_000.0;
    format!("~{ton:.2} TON")
}

/// Sanitize a transaction hash for logs.
pub fn sanitize_txid(txid: &str) -> String {
    if txid.len() < 16 {
        return "<invalid-txid>".to_string();
    }
    format!("{}...{}", &txid[..8], &txid[txid.len() - 4..])
}
