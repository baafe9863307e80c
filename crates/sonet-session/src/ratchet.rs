//! Double Ratchet (spec §4.D): per-message forward-secret, post-compromise
//! secure encryption for a pairwise session. Grounded on
//! `dl_crypto::ratchet::RatchetSession`'s `kdf_rk`, re-expressed with the
//! spec's own per-message HKDF info strings (`"mk"`, `"ck"`) and its
//! explicit phase state machine instead of the teacher's implicit all-zero
//! "not yet established" chain keys.
//!
//! Root-key advances (bootstrap and both legs of a DH ratchet step) use a
//! single HKDF info constant (`ROOT_CHAIN_INFO`) rather than two distinct
//! per-leg strings: two distinct labels would make the derived chain key
//! depend on which side (old-key-holder vs new-key-generator) computed it,
//! so the initiator's send chain and the responder's matching receive
//! chain would diverge after the first DH ratchet step. One label,
//! matching `kdf_rk`, lets the commutative DH values alone determine
//! agreement, the way the teacher's single-function design does.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sonet_crypto::aead::{self, AeadAlgorithm, TAG_LEN};
use sonet_crypto::cache::KeyCache;
use sonet_crypto::dh::{self, KeypairProtocol};
use sonet_crypto::kdf;
use zeroize::{Zeroize, Zeroizing};

use crate::error::SessionError;
use crate::header::RatchetHeader;

/// Default cap on messages per sending chain before a proactive rekey.
pub const MAX_PER_CHAIN: u32 = 1000;
/// Default wall-clock interval before a proactive rekey, in hours.
pub const REKEY_INTERVAL_HOURS: i64 = 24;
/// Default cap on retained skipped message keys per session.
pub const MAX_SKIPPED: usize = 1000;

const AEAD_ALG: AeadAlgorithm = AeadAlgorithm::ChaCha20Poly1305;
/// HKDF info for every root-key-advancing derivation (bootstrap, both legs
/// of a DH ratchet step, and a proactive rekey). See the module doc for why
/// this is one constant rather than the spec text's two distinct strings.
const ROOT_CHAIN_INFO: &[u8] = b"ratchet_chain";

/// Ratchet session lifecycle (spec §9 "state machines as tagged variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatchetPhase {
    Uninitialized,
    Initiated,
    Established,
    Compromised,
    Closed,
}

/// A fully self-contained wire message: header plus AEAD output. The
/// ciphertext carries its AEAD nonce as a 12-byte prefix, so the pair
/// `(header, ciphertext, tag)` is everything a peer needs to decrypt,
/// matching the spec's three-part `encrypt` return without inventing a
/// fourth wire field for the nonce.
pub struct RatchetMessage {
    pub header: RatchetHeader,
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Complete Double Ratchet state for one pairwise session.
pub struct RatchetState {
    pub session_id: String,
    pub chat_id: String,
    pub our_identity_pub: [u8; 32],
    pub their_identity_pub: [u8; 32],

    root_key: [u8; 32],
    chain_send_key: [u8; 32],
    chain_recv_key: [u8; 32],
    our_ratchet_priv: [u8; 32],
    our_ratchet_pub: [u8; 32],
    their_ratchet_pub: Option<[u8; 32]>,

    pub n_send: u32,
    pub n_recv: u32,
    /// Length of the previous sending chain, carried in our next header so
    /// the peer can finish draining skipped keys for the chain we just left.
    pub pn: u32,

    skipped: KeyCache<Zeroizing<[u8; 32]>>,

    pub created_at: DateTime<Utc>,
    pub last_ratchet_at: DateTime<Utc>,
    pub msgs_since_rekey: u32,

    pub phase: RatchetPhase,
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.chain_send_key.zeroize();
        self.chain_recv_key.zeroize();
        self.our_ratchet_priv.zeroize();
    }
}

fn hkdf32(ikm: &[u8], info: &[u8]) -> Result<[u8; 32], SessionError> {
    let mut out = [0u8; 32];
    kdf::hkdf(ikm, b"", info, &mut out)?;
    Ok(out)
}

fn skip_key(dh_pub: Option<[u8; 32]>, n: u32) -> String {
    format!("{}:{n}", dh_pub.map(hex::encode).unwrap_or_default())
}

impl RatchetState {
    /// Construct as the X3DH initiator. `their_initial_ratchet_pub` is the
    /// peer's signed prekey public — the first value used as
    /// `their_ratchet_pub` before any real ratchet message has arrived.
    pub fn init_initiator(
        session_id: impl Into<String>,
        chat_id: impl Into<String>,
        our_identity_pub: [u8; 32],
        their_identity_pub: [u8; 32],
        root_key: [u8; 32],
        their_initial_ratchet_pub: [u8; 32],
    ) -> Result<Self, SessionError> {
        let keypair = dh::generate_keypair(KeypairProtocol::X25519)?;
        let our_ratchet_priv: [u8; 32] = keypair
            .private
            .try_into()
            .map_err(|_| SessionError::InvalidHeader("ratchet key must be 32 bytes".into()))?;
        let our_ratchet_pub: [u8; 32] = keypair
            .public
            .try_into()
            .map_err(|_| SessionError::InvalidHeader("ratchet key must be 32 bytes".into()))?;

        // Mirrors the "old own key × new peer key" half of a full DH
        // ratchet step (spec §4.D step 3) — the initiator has no prior own
        // ratchet key to pair with a *new* peer key, so there is no second
        // leg to run yet. The responder will reproduce this exact
        // derivation (same root_key, same commutative DH output) the first
        // time it processes a message on this chain.
        let mut dh_out = dh::dh(&our_ratchet_priv, &their_initial_ratchet_pub)?;
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(&root_key);
        ikm.extend_from_slice(&dh_out);
        let mut buf = [0u8; 64];
        kdf::hkdf(&ikm, b"", ROOT_CHAIN_INFO, &mut buf)?;
        ikm.zeroize();
        dh_out.zeroize();

        let mut new_root = [0u8; 32];
        let mut chain_send_key = [0u8; 32];
        new_root.copy_from_slice(&buf[..32]);
        chain_send_key.copy_from_slice(&buf[32..]);
        buf.zeroize();

        let now = Utc::now();
        Ok(Self {
            session_id: session_id.into(),
            chat_id: chat_id.into(),
            our_identity_pub,
            their_identity_pub,
            root_key: new_root,
            chain_send_key,
            chain_recv_key: [0u8; 32],
            our_ratchet_priv,
            our_ratchet_pub,
            their_ratchet_pub: Some(their_initial_ratchet_pub),
            n_send: 0,
            n_recv: 0,
            pn: 0,
            skipped: KeyCache::new(MAX_SKIPPED),
            created_at: now,
            last_ratchet_at: now,
            msgs_since_rekey: 0,
            phase: RatchetPhase::Initiated,
        })
    }

    /// Construct as the X3DH responder. `our_ratchet_priv`/`our_ratchet_pub`
    /// are the device's current signed prekey keypair — reused as the
    /// initial ratchet identity until the first real DH ratchet step.
    pub fn init_responder(
        session_id: impl Into<String>,
        chat_id: impl Into<String>,
        our_identity_pub: [u8; 32],
        their_identity_pub: [u8; 32],
        root_key: [u8; 32],
        our_ratchet_priv: [u8; 32],
        our_ratchet_pub: [u8; 32],
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            chat_id: chat_id.into(),
            our_identity_pub,
            their_identity_pub,
            root_key,
            chain_send_key: [0u8; 32],
            chain_recv_key: [0u8; 32],
            our_ratchet_priv,
            our_ratchet_pub,
            their_ratchet_pub: None,
            n_send: 0,
            n_recv: 0,
            pn: 0,
            skipped: KeyCache::new(MAX_SKIPPED),
            created_at: now,
            last_ratchet_at: now,
            msgs_since_rekey: 0,
            phase: RatchetPhase::Initiated,
        }
    }

    pub fn our_ratchet_pub(&self) -> [u8; 32] {
        self.our_ratchet_pub
    }

    pub fn root_key(&self) -> [u8; 32] {
        self.root_key
    }

    /// Wipe root and chain keys; the next outbound message requires a
    /// fresh X3DH (spec §4.D "Compromise recovery").
    pub fn mark_compromised(&mut self) {
        self.root_key.zeroize();
        self.chain_send_key.zeroize();
        self.chain_recv_key.zeroize();
        self.phase = RatchetPhase::Compromised;
    }

    pub fn close(&mut self) {
        self.phase = RatchetPhase::Closed;
    }

    /// `encrypt(session, plaintext, aad) → (header, ct, tag)`.
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<RatchetMessage, SessionError> {
        match self.phase {
            RatchetPhase::Compromised => return Err(SessionError::Compromised),
            RatchetPhase::Closed => return Err(SessionError::SessionExpired),
            _ => {}
        }
        if self.chain_send_key == [0u8; 32] {
            return Err(SessionError::InvalidHeader(
                "sending chain not yet established; a message must be received first".into(),
            ));
        }

        self.maybe_force_rekey()?;

        let mut mk = hkdf32(&self.chain_send_key, b"mk")?;
        self.chain_send_key = hkdf32(&self.chain_send_key, b"ck")?;

        let header = RatchetHeader {
            dh_pub: self.our_ratchet_pub,
            pn: self.pn,
            n: self.n_send,
        };
        let header_bytes = header.to_bytes();
        let mut full_aad = Vec::with_capacity(aad.len() + header_bytes.len());
        full_aad.extend_from_slice(aad);
        full_aad.extend_from_slice(&header_bytes);

        let nonce = aead::fresh_nonce(AEAD_ALG)?;
        let (ct, tag) = aead::aead_encrypt(AEAD_ALG, &mk, &nonce, &full_aad, plaintext)?;
        mk.zeroize();

        self.n_send += 1;
        self.msgs_since_rekey += 1;
        self.phase = RatchetPhase::Established;

        let mut ciphertext = Vec::with_capacity(nonce.len() + ct.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&ct);

        Ok(RatchetMessage { header, ciphertext, tag })
    }

    /// `decrypt(session, header, ct, tag, aad) → plaintext`.
    pub fn decrypt(&mut self, msg: &RatchetMessage, aad: &[u8]) -> Result<Vec<u8>, SessionError> {
        match self.phase {
            RatchetPhase::Compromised => return Err(SessionError::Compromised),
            RatchetPhase::Closed => return Err(SessionError::SessionExpired),
            _ => {}
        }
        let header = &msg.header;
        if msg.ciphertext.len() < AEAD_ALG.nonce_len() {
            return Err(SessionError::InvalidHeader("ciphertext missing nonce prefix".into()));
        }
        let (nonce, ct) = msg.ciphertext.split_at(AEAD_ALG.nonce_len());

        let needs_ratchet = match self.their_ratchet_pub {
            Some(current) => current != header.dh_pub,
            None => true,
        };
        if needs_ratchet {
            self.dh_ratchet_step(header.dh_pub, Some(header.pn))?;
        }

        if header.n < self.n_recv {
            let key = skip_key(self.their_ratchet_pub, header.n);
            return match self.skipped.remove(&key) {
                Some(mut mk) => {
                    let header_bytes = header.to_bytes();
                    let mut full_aad = Vec::with_capacity(aad.len() + header_bytes.len());
                    full_aad.extend_from_slice(aad);
                    full_aad.extend_from_slice(&header_bytes);
                    let plaintext = aead::aead_decrypt(AEAD_ALG, &mk[..], nonce, &full_aad, ct, &msg.tag)?;
                    mk.zeroize();
                    Ok(plaintext)
                }
                None if self.their_ratchet_pub == Some(header.dh_pub) => {
                    Err(SessionError::ReplayDetected { dh_pub: hex::encode(header.dh_pub), n: header.n })
                }
                None => Err(SessionError::SkippedKeyMissing {
                    dh_pub: hex::encode(header.dh_pub),
                    n: header.n,
                }),
            };
        }

        self.skip_message_keys_until(header.n)?;

        let mut mk = hkdf32(&self.chain_recv_key, b"mk")?;
        self.chain_recv_key = hkdf32(&self.chain_recv_key, b"ck")?;
        self.n_recv += 1;

        let header_bytes = header.to_bytes();
        let mut full_aad = Vec::with_capacity(aad.len() + header_bytes.len());
        full_aad.extend_from_slice(aad);
        full_aad.extend_from_slice(&header_bytes);
        let plaintext = aead::aead_decrypt(AEAD_ALG, &mk, nonce, &full_aad, ct, &msg.tag)?;
        mk.zeroize();
        self.phase = RatchetPhase::Established;

        Ok(plaintext)
    }

    /// Derive and store message keys for `n_recv..until`, bounded by
    /// `MAX_SKIPPED` (enforced by `skipped`'s own capacity — eviction of
    /// the oldest entry is logged, not treated as an error, matching
    /// "drop oldest and record the loss").
    fn skip_message_keys_until(&mut self, until: u32) -> Result<(), SessionError> {
        if until <= self.n_recv {
            return Ok(());
        }
        let skip_count = until - self.n_recv;
        if skip_count as usize > MAX_SKIPPED {
            return Err(SessionError::SkippedKeyBudgetExceeded {
                requested: skip_count,
                limit: MAX_SKIPPED,
            });
        }
        while self.n_recv < until {
            let mk = hkdf32(&self.chain_recv_key, b"mk")?;
            self.chain_recv_key = hkdf32(&self.chain_recv_key, b"ck")?;
            let key = skip_key(self.their_ratchet_pub, self.n_recv);
            if self.skipped.insert(key, Zeroizing::new(mk)).is_some() {
                tracing::trace!(
                    session_id = %self.session_id,
                    "skipped-key cache at capacity; oldest entry evicted and zeroized"
                );
            }
            self.n_recv += 1;
        }
        Ok(())
    }

    /// DH ratchet step (spec §4.D). `incoming_pn` is `Some(header.pn)` when
    /// triggered by a received header (draining the old chain first), or
    /// `None` for a proactive, self-triggered rekey with no peer header.
    fn dh_ratchet_step(&mut self, new_their_pub: [u8; 32], incoming_pn: Option<u32>) -> Result<(), SessionError> {
        if let Some(pn) = incoming_pn {
            if self.their_ratchet_pub.is_some() {
                self.skip_message_keys_until(pn)?;
            }
        }

        let mut dh_out = dh::dh(&self.our_ratchet_priv, &new_their_pub)?;
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(&self.root_key);
        ikm.extend_from_slice(&dh_out);
        let mut buf = [0u8; 64];
        kdf::hkdf(&ikm, b"", ROOT_CHAIN_INFO, &mut buf)?;
        ikm.zeroize();
        dh_out.zeroize();
        self.root_key.copy_from_slice(&buf[..32]);
        self.chain_recv_key.copy_from_slice(&buf[32..]);
        buf.zeroize();

        let keypair = dh::generate_keypair(KeypairProtocol::X25519)?;
        let new_priv: [u8; 32] = keypair
            .private
            .try_into()
            .map_err(|_| SessionError::InvalidHeader("ratchet key must be 32 bytes".into()))?;
        let new_pub: [u8; 32] = keypair
            .public
            .try_into()
            .map_err(|_| SessionError::InvalidHeader("ratchet key must be 32 bytes".into()))?;

        let mut dh_out2 = dh::dh(&new_priv, &new_their_pub)?;
        let mut ikm2 = Vec::with_capacity(64);
        ikm2.extend_from_slice(&self.root_key);
        ikm2.extend_from_slice(&dh_out2);
        let mut buf2 = [0u8; 64];
        kdf::hkdf(&ikm2, b"", ROOT_CHAIN_INFO, &mut buf2)?;
        ikm2.zeroize();
        dh_out2.zeroize();
        self.root_key.copy_from_slice(&buf2[..32]);
        self.chain_send_key.copy_from_slice(&buf2[32..]);
        buf2.zeroize();

        self.our_ratchet_priv = new_priv;
        self.our_ratchet_pub = new_pub;
        self.their_ratchet_pub = Some(new_their_pub);
        self.pn = self.n_send;
        self.n_send = 0;
        self.n_recv = 0;
        self.msgs_since_rekey = 0;
        self.last_ratchet_at = Utc::now();
        self.phase = RatchetPhase::Established;
        Ok(())
    }

    /// Proactively rekey the sending side if the chain has carried too many
    /// messages or gone too long without a DH step (spec §4.D step 7). Only
    /// the sending half is refreshed — the receiving chain is untouched,
    /// since the peer has not announced a new ratchet key.
    fn maybe_force_rekey(&mut self) -> Result<(), SessionError> {
        let due_by_count = self.msgs_since_rekey > MAX_PER_CHAIN;
        let elapsed = Utc::now().signed_duration_since(self.last_ratchet_at);
        let due_by_time = elapsed > Duration::hours(REKEY_INTERVAL_HOURS);
        let Some(their) = self.their_ratchet_pub else {
            return Ok(());
        };
        if !(due_by_count || due_by_time) {
            return Ok(());
        }

        let keypair = dh::generate_keypair(KeypairProtocol::X25519)?;
        let new_priv: [u8; 32] = keypair
            .private
            .try_into()
            .map_err(|_| SessionError::InvalidHeader("ratchet key must be 32 bytes".into()))?;
        let new_pub: [u8; 32] = keypair
            .public
            .try_into()
            .map_err(|_| SessionError::InvalidHeader("ratchet key must be 32 bytes".into()))?;

        let mut dh_out = dh::dh(&new_priv, &their)?;
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(&self.root_key);
        ikm.extend_from_slice(&dh_out);
        let mut buf = [0u8; 64];
        kdf::hkdf(&ikm, b"", ROOT_CHAIN_INFO, &mut buf)?;
        ikm.zeroize();
        dh_out.zeroize();
        self.root_key.copy_from_slice(&buf[..32]);
        self.chain_send_key.copy_from_slice(&buf[32..]);
        buf.zeroize();

        self.our_ratchet_priv = new_priv;
        self.our_ratchet_pub = new_pub;
        self.pn = self.n_send;
        self.n_send = 0;
        self.msgs_since_rekey = 0;
        self.last_ratchet_at = Utc::now();
        Ok(())
    }

    /// Persistable view of this session (spec §4.F: "the ratchet's own
    /// private keys are serialized, since losing them means losing the
    /// session"). `skipped` is deliberately excluded — out-of-order
    /// tolerance across a process restart isn't an invariant this crate
    /// promises, and the cache is short-lived by design anyway.
    pub fn to_snapshot(&self) -> RatchetSnapshot {
        RatchetSnapshot {
            session_id: self.session_id.clone(),
            chat_id: self.chat_id.clone(),
            our_identity_pub: hex::encode(self.our_identity_pub),
            their_identity_pub: hex::encode(self.their_identity_pub),
            root_key: hex::encode(self.root_key),
            chain_send_key: hex::encode(self.chain_send_key),
            chain_recv_key: hex::encode(self.chain_recv_key),
            our_ratchet_priv: hex::encode(self.our_ratchet_priv),
            our_ratchet_pub: hex::encode(self.our_ratchet_pub),
            their_ratchet_pub: self.their_ratchet_pub.map(hex::encode),
            n_send: self.n_send,
            n_recv: self.n_recv,
            pn: self.pn,
            created_at: self.created_at,
            last_ratchet_at: self.last_ratchet_at,
            msgs_since_rekey: self.msgs_since_rekey,
            phase: self.phase,
        }
    }

    pub fn from_snapshot(snapshot: RatchetSnapshot) -> Result<Self, SessionError> {
        Ok(Self {
            session_id: snapshot.session_id,
            chat_id: snapshot.chat_id,
            our_identity_pub: hex32(&snapshot.our_identity_pub)?,
            their_identity_pub: hex32(&snapshot.their_identity_pub)?,
            root_key: hex32(&snapshot.root_key)?,
            chain_send_key: hex32(&snapshot.chain_send_key)?,
            chain_recv_key: hex32(&snapshot.chain_recv_key)?,
            our_ratchet_priv: hex32(&snapshot.our_ratchet_priv)?,
            our_ratchet_pub: hex32(&snapshot.our_ratchet_pub)?,
            their_ratchet_pub: snapshot.their_ratchet_pub.map(|s| hex32(&s)).transpose()?,
            n_send: snapshot.n_send,
            n_recv: snapshot.n_recv,
            pn: snapshot.pn,
            skipped: KeyCache::new(MAX_SKIPPED),
            created_at: snapshot.created_at,
            last_ratchet_at: snapshot.last_ratchet_at,
            msgs_since_rekey: snapshot.msgs_since_rekey,
            phase: snapshot.phase,
        })
    }
}

fn hex32(s: &str) -> Result<[u8; 32], SessionError> {
    let bytes = hex::decode(s).map_err(|e| SessionError::InvalidHeader(e.to_string()))?;
    bytes.try_into().map_err(|_| SessionError::InvalidHeader("expected 32-byte key".into()))
}

/// Wire/storage form of [`RatchetState`] (spec §4.F). Hex-encoded rather
/// than raw bytes so it round-trips through `serde_json` the same way
/// `KeyBundle` does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetSnapshot {
    pub session_id: String,
    pub chat_id: String,
    pub our_identity_pub: String,
    pub their_identity_pub: String,
    root_key: String,
    chain_send_key: String,
    chain_recv_key: String,
    our_ratchet_priv: String,
    our_ratchet_pub: String,
    their_ratchet_pub: Option<String>,
    pub n_send: u32,
    pub n_recv: u32,
    pub pn: u32,
    pub created_at: DateTime<Utc>,
    pub last_ratchet_at: DateTime<Utc>,
    pub msgs_since_rekey: u32,
    pub phase: RatchetPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_sessions() -> (RatchetState, RatchetState) {
        let root_key = [7u8; 32];
        let bob_spk = dh::generate_keypair(KeypairProtocol::X25519).unwrap();
        let bob_spk_priv: [u8; 32] = bob_spk.private.try_into().unwrap();
        let bob_spk_pub: [u8; 32] = bob_spk.public.try_into().unwrap();

        let alice = RatchetState::init_initiator(
            "sess-1", "chat-1", [1u8; 32], [2u8; 32], root_key, bob_spk_pub,
        )
        .unwrap();
        let bob = RatchetState::init_responder(
            "sess-1", "chat-1", [2u8; 32], [1u8; 32], root_key, bob_spk_priv, bob_spk_pub,
        );
        (alice, bob)
    }

    #[test]
    fn happy_path_pairwise_exchange() {
        let (mut alice, mut bob) = paired_sessions();

        for i in 0..17u32 {
            let msg = alice.encrypt(format!("hello {i}").as_bytes(), b"aad").unwrap();
            let pt = bob.decrypt(&msg, b"aad").unwrap();
            assert_eq!(pt, format!("hello {i}").into_bytes());
        }
        for i in 0..5u32 {
            let msg = bob.encrypt(format!("reply {i}").as_bytes(), b"aad").unwrap();
            let pt = alice.decrypt(&msg, b"aad").unwrap();
            assert_eq!(pt, format!("reply {i}").into_bytes());
        }
    }

    #[test]
    fn out_of_order_delivery_recovers_all_messages() {
        let (mut alice, mut bob) = paired_sessions();
        let m1 = alice.encrypt(b"m1", b"").unwrap();
        let m2 = alice.encrypt(b"m2", b"").unwrap();
        let m3 = alice.encrypt(b"m3", b"").unwrap();
        let m4 = alice.encrypt(b"m4", b"").unwrap();
        let m5 = alice.encrypt(b"m5", b"").unwrap();

        assert_eq!(bob.decrypt(&m3, b"").unwrap(), b"m3");
        assert_eq!(bob.decrypt(&m1, b"").unwrap(), b"m1");
        assert_eq!(bob.decrypt(&m5, b"").unwrap(), b"m5");
        assert_eq!(bob.decrypt(&m2, b"").unwrap(), b"m2");
        assert_eq!(bob.decrypt(&m4, b"").unwrap(), b"m4");

        assert_eq!(bob.n_recv, 5);
        assert_eq!(bob.skipped.len(), 0);
    }

    #[test]
    fn permanently_lost_message_leaves_one_skipped_entry() {
        let (mut alice, mut bob) = paired_sessions();
        let messages: Vec<_> = (0..10).map(|i| alice.encrypt(format!("m{i}").as_bytes(), b"").unwrap()).collect();

        for (i, msg) in messages.iter().enumerate() {
            if i == 3 {
                continue; // M4 permanently lost
            }
            let pt = bob.decrypt(msg, b"").unwrap();
            assert_eq!(pt, format!("m{i}").into_bytes());
        }
        assert_eq!(bob.skipped.len(), 1);
    }

    #[test]
    fn dh_ratchet_across_silence_changes_dh_pub_and_root_key() {
        let (mut alice, mut bob) = paired_sessions();
        let root_before = alice.root_key();

        let m1 = alice.encrypt(b"m1", b"").unwrap();
        let m1_dh = m1.header.dh_pub;
        bob.decrypt(&m1, b"").unwrap();
        let root_after_bob_receives = bob.root_key();
        assert_ne!(root_before, root_after_bob_receives);

        let r1 = bob.encrypt(b"r1", b"").unwrap();
        alice.decrypt(&r1, b"").unwrap();
        let root_after_alice_ratchets = alice.root_key();
        assert_ne!(root_after_bob_receives, root_after_alice_ratchets);

        let m2 = alice.encrypt(b"m2", b"").unwrap();
        assert_ne!(m2.header.dh_pub, m1_dh);
        let pt = bob.decrypt(&m2, b"").unwrap();
        assert_eq!(pt, b"m2");
    }

    #[test]
    fn replayed_message_fails_second_delivery() {
        let (mut alice, mut bob) = paired_sessions();
        let msg = alice.encrypt(b"once", b"").unwrap();
        assert_eq!(bob.decrypt(&msg, b"").unwrap(), b"once");
        let result = bob.decrypt(&msg, b"");
        assert!(result.is_err());
    }

    #[test]
    fn mark_compromised_blocks_further_encryption() {
        let (mut alice, _bob) = paired_sessions();
        alice.mark_compromised();
        let result = alice.encrypt(b"should fail", b"");
        assert!(matches!(result, Err(SessionError::Compromised)));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let (mut alice, mut bob) = paired_sessions();
        let mut msg = alice.encrypt(b"payload", b"aad").unwrap();
        let last = msg.ciphertext.len() - 1;
        msg.ciphertext[last] ^= 0x01;
        let result = bob.decrypt(&msg, b"aad");
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_roundtrip_preserves_session_continuity() {
        let (mut alice, mut bob) = paired_sessions();
        let m1 = alice.encrypt(b"before restart", b"").unwrap();
        bob.decrypt(&m1, b"").unwrap();

        let snapshot = alice.to_snapshot();
        let json = serde_json::to_vec(&snapshot).unwrap();
        let restored: RatchetSnapshot = serde_json::from_slice(&json).unwrap();
        let mut alice = RatchetState::from_snapshot(restored).unwrap();

        let m2 = alice.encrypt(b"after restart", b"").unwrap();
        assert_eq!(bob.decrypt(&m2, b"").unwrap(), b"after restart");
    }
}
