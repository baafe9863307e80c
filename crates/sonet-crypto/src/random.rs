//! CSPRNG surface (spec §4.A). Backed by the OS entropy source; treated
//! as a process-wide resource per spec §5 — failure to seed is fatal at
//! startup, modeled here as `RandomSourceFailure`.

use rand::RngCore;

use crate::error::CryptoError;

pub fn random_bytes(n: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CryptoError::RandomSourceFailure(e.to_string()))?;
    Ok(buf)
}

pub fn random_hex(n: usize) -> Result<String, CryptoError> {
    Ok(hex::encode(random_bytes(n)?))
}

pub fn random_u64() -> Result<u64, CryptoError> {
    let bytes = random_bytes(8)?;
    let arr: [u8; 8] = bytes
        .try_into()
        .expect("random_bytes(8) always returns 8 bytes");
    Ok(u64::from_le_bytes(arr))
}
