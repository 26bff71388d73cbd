//! External correlation keys for payment intents.

use chrono::{DateTime, Utc};
use rand::RngCore;

/// `TXN_<YYYYMMDD>_<16 upper hex>`, the merchant transaction id sent to the gateway.
pub fn transaction_id(now: DateTime<Utc>) -> String {
    format!("TXN_{}_{}", now.format("%Y%m%d"), random_hex::<8>())
}

/// `REC-<12 upper hex>`.
pub fn receipt_number() -> String {
    format!("REC-{}", random_hex::<6>())
}

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}
