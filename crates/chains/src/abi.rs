//! ERC-20 `Transfer` log codec shared by the EVM and Tron adapters.

use once_cell::sync::Lazy;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use donation_watch_domain::parse_hex_quantity;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `topic0` of `Transfer(address,address,uint256)`, `0x`-prefixed.
pub static TRANSFER_EVENT_TOPIC: Lazy<String> =
    Lazy::new(|| format!("0x{}", hex::encode(keccak256(b"Transfer(address,address,uint256)"))));

/// Selector of `balanceOf(address)`.
pub static BALANCE_OF_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("balanceOf(address)"));

/// Selector of `transfer(address,uint256)`.
pub static TRANSFER_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("transfer(address,uint256)"));

fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("log is not an ERC-20 Transfer event")]
    NotTransfer,
    #[error("malformed ABI word `{0}`")]
    MalformedWord(String),
    #[error("transfer amount does not fit into 128 bits")]
    AmountOverflow,
}

/// A decoded `Transfer` event. Addresses are `0x` + 40 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLog {
    pub contract: String,
    pub from: String,
    pub to: String,
    pub raw_amount: u128,
}

fn strip_0x(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

pub fn is_transfer_topic(topic: &str) -> bool {
    strip_0x(topic).eq_ignore_ascii_case(strip_0x(&TRANSFER_EVENT_TOPIC))
}

/// Extracts the address packed into the low 20 bytes of a 32-byte word.
pub fn word_to_address(word: &str) -> Result<String, AbiError> {
    let digits = strip_0x(word);
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AbiError::MalformedWord(word.to_string()));
    }
    Ok(format!("0x{}", digits[24..].to_ascii_lowercase()))
}

/// Left-pads a 20-byte address into a 32-byte topic word.
pub fn address_to_word(address: &str) -> String {
    format!("0x{:0>64}", strip_0x(address).to_ascii_lowercase())
}

fn word_to_amount(word: &str) -> Result<u128, AbiError> {
    let digits = strip_0x(word);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AbiError::MalformedWord(word.to_string()));
    }
    parse_hex_quantity(digits).map_err(|_| AbiError::AmountOverflow)
}

/// Decodes a `Transfer(from, to, value)` log: sender and recipient from the
/// indexed topics, the amount from the first data word.
pub fn decode_transfer_log(
    contract: &str,
    topics: &[String],
    data: &str,
) -> Result<TransferLog, AbiError> {
    if topics.len() < 3 || !is_transfer_topic(&topics[0]) {
        return Err(AbiError::NotTransfer);
    }
    let data = strip_0x(data);
    if data.len() < 64 || !data.is_ascii() {
        return Err(AbiError::MalformedWord(data.to_string()));
    }
    Ok(TransferLog {
        contract: format!("0x{}", strip_0x(contract).to_ascii_lowercase()),
        from: word_to_address(&topics[1])?,
        to: word_to_address(&topics[2])?,
        raw_amount: word_to_amount(&data[..64])?,
    })
}

/// Builds `balanceOf(owner)` calldata.
pub fn encode_balance_of(owner: &str) -> String {
    format!(
        "0x{}{}",
        hex::encode(*BALANCE_OF_SELECTOR),
        strip_0x(&address_to_word(owner))
    )
}

/// Decodes `transfer(to, amount)` calldata, used when a receipt carries no
/// logs (pending or reverted transactions).
pub fn decode_transfer_call(input: &str) -> Option<(String, u128)> {
    let digits = strip_0x(input);
    if digits.len() < 8 + 128 || !digits.is_ascii() {
        return None;
    }
    let (head, args) = digits.split_at(8);
    if !head.eq_ignore_ascii_case(&hex::encode(*TRANSFER_SELECTOR)) {
        return None;
    }
    let to = word_to_address(&args[..64]).ok()?;
    let amount = word_to_amount(&args[64..128]).ok()?;
    Some((to, amount))
}
