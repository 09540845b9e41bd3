//! Identifier minting

use bech32::Bech32m;
use uuid7::uuid7;

pub const ORDER_HRP: &str = "so_";
pub const PAYMENT_HRP: &str = "pay_";

// construct a unique entity id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Zero-padded key suffix so lexical order in sled matches numeric order.
pub(crate) fn ordinal_key(prefix: &str, ordinal: u64) -> String {
    format!("{prefix}/{ordinal:010}")
}
