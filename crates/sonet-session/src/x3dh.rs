//! X3DH session initiator (spec §4.C). Derives the initial root key from
//! 2-4 DH outputs; grounded on `dl_crypto::x3dh::{initiate, respond}`,
//! adapted to the spec's exact DH set (`DH1..DH4` against the peer's
//! identity/signed-prekey/one-time-prekey rather than the teacher's
//! mutual-DH ordering) and its own HKDF info string.

use sonet_crypto::dh::{self, KeypairProtocol};
use sonet_crypto::{kdf, random, Engine};
use sonet_registry::{DeviceState, KeyBundle};
use x25519_dalek::PublicKey as X25519Public;
use zeroize::Zeroize;

use crate::error::SessionError;
use crate::identity_dh::{ed25519_pub_to_x25519, ed25519_secret_to_x25519};

pub const ROOT_KEY_INFO: &[u8] = b"sonet:x3dh:root";

fn hex32(s: &str) -> Result<[u8; 32], SessionError> {
    let bytes = hex::decode(s).map_err(|e| SessionError::InvalidHeader(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SessionError::InvalidHeader("expected 32-byte key".into()))
}

/// Result of a successful X3DH handshake from the initiator's side.
pub struct X3DHResult {
    pub root_key: [u8; 32],
    pub session_id: String,
    /// The one-time prekey id consumed, if any — the caller is
    /// responsible for telling the registry to release it.
    pub consumed_opk_id: Option<String>,
    pub ephemeral_pub: [u8; 32],
    /// HKDF salt used to derive `root_key`; must travel to the responder
    /// alongside `ephemeral_pub` and `session_id` so [`respond`] can
    /// reproduce the same root key.
    pub salt: [u8; 32],
}

/// `initiate_session(our_device, peer_bundle) → (session_id,
/// initial_ratchet_pub)` (spec §4.C). The ratchet itself is constructed
/// by the caller from `X3DHResult::root_key`; this function only derives
/// the shared secret.
///
/// `our_identity_priv` is threaded in separately from `our_device` rather
/// than always reading `our_device.identity_priv`, because DH3 (our
/// identity private × peer signed prekey) is only mixed into the root key
/// when an identity private key is actually available to the caller — a
/// device whose identity key lives behind a hardware-backed signer may be
/// able to produce `our_device` (public metadata) without ever exposing
/// the private scalar. When `None`, DH3 is skipped and a
/// `WeakAuthentication` warning is logged, resolving the open question of
/// whether to permit this silently or flag it.
pub fn initiate(
    engine: &Engine,
    our_device: &DeviceState,
    our_identity_priv: Option<&sonet_crypto::CryptoKey>,
    peer_bundle: &KeyBundle,
) -> Result<X3DHResult, SessionError> {
    if !sonet_registry::bundle::verify_bundle(engine, peer_bundle)? {
        return Err(SessionError::InvalidSignature);
    }

    let peer_identity_ed = hex32(&peer_bundle.identity_key_pub_hex)?;
    let peer_identity_x = ed25519_pub_to_x25519(&peer_identity_ed)?;
    let peer_spk = X25519Public::from(hex32(&peer_bundle.signed_prekey_pub_hex)?);

    let ephemeral = dh::generate_keypair(KeypairProtocol::X25519)?;
    let ek_priv: [u8; 32] = ephemeral.private.clone().try_into().unwrap();
    let ek_pub: [u8; 32] = ephemeral.public.try_into().unwrap();

    let dh1 = dh::dh(&ek_priv, peer_identity_x.as_bytes())?;
    let dh2 = dh::dh(&ek_priv, peer_spk.as_bytes())?;

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);

    match our_identity_priv {
        Some(identity_priv) => {
            let our_identity_x = ed25519_secret_to_x25519(
                identity_priv.expose_material().try_into().map_err(|_| {
                    SessionError::InvalidHeader("identity key must be 32 bytes".into())
                })?,
            );
            let dh3 = our_identity_x.diffie_hellman(&peer_spk);
            ikm.extend_from_slice(dh3.as_bytes());
        }
        None => {
            tracing::warn!(
                our_user = %our_device.user_id,
                our_device = %our_device.device_id,
                peer_user = %peer_bundle.user_id,
                event = "WeakAuthentication",
                "X3DH initiated without our identity private key; DH3 omitted, \
                 session authenticates only the peer, not us"
            );
        }
    }

    let mut consumed_opk_id = None;
    if let Some(otk) = peer_bundle.one_time_prekeys.first() {
        let opk_pub = hex32(&otk.pub_hex)?;
        let dh4 = dh::dh(&ek_priv, &opk_pub)?;
        ikm.extend_from_slice(&dh4);
        consumed_opk_id = Some(otk.id.clone());
    } else {
        tracing::warn!(
            peer_user = %peer_bundle.user_id,
            "no one-time prekey available; X3DH proceeding with reduced forward secrecy"
        );
    }

    let salt: [u8; 32] = random::random_bytes(32)?
        .try_into()
        .expect("random_bytes(32) returns exactly 32 bytes");
    let mut root_key = [0u8; 32];
    kdf::hkdf(&ikm, &salt, ROOT_KEY_INFO, &mut root_key)?;
    ikm.zeroize();

    Ok(X3DHResult {
        root_key,
        session_id: uuid::Uuid::new_v4().to_string(),
        consumed_opk_id,
        ephemeral_pub: ek_pub,
        salt,
    })
}

/// Responder-side mirror computation (spec §4.C: "Acceptor side runs the
/// mirror computation using its private halves and the sender's
/// ephemeral public").
///
/// `salt` must be the same 32-byte salt the initiator used — carried
/// alongside the session-id in the X3DH init header at the transport
/// layer (outside this crate's scope; spec §1 places the wire
/// format/transport out of scope beyond the ratchet header itself).
///
/// `peer_included_dh3` must mirror whatever the initiator actually did:
/// `initiate` only mixes DH3 into the root key when its caller supplied an
/// identity private key, so a responder that always derived DH3 would
/// silently land on a different root key whenever the initiator omitted
/// it — the wire layer carrying `X3DHResult` to the peer must carry this
/// flag alongside `ephemeral_pub`/`salt`.
pub fn respond(
    engine: &Engine,
    our_device: &DeviceState,
    our_signed_prekey_priv: &sonet_crypto::CryptoKey,
    our_one_time_prekey_priv: Option<&sonet_crypto::CryptoKey>,
    sender_identity_pub_hex: &str,
    sender_ephemeral_pub: &[u8; 32],
    salt: &[u8; 32],
    peer_included_dh3: bool,
) -> Result<[u8; 32], SessionError> {
    let _ = engine; // kept for symmetry with `initiate`'s signature; no engine calls needed here

    let sender_identity_ed = hex32(sender_identity_pub_hex)?;
    let sender_identity_x = ed25519_pub_to_x25519(&sender_identity_ed)?;
    let ek_a_pub = X25519Public::from(*sender_ephemeral_pub);

    let spk_priv_bytes: [u8; 32] = our_signed_prekey_priv
        .expose_material()
        .try_into()
        .map_err(|_| SessionError::InvalidHeader("signed prekey must be 32 bytes".into()))?;
    let identity_priv_bytes: [u8; 32] = our_device
        .identity_priv
        .expose_material()
        .try_into()
        .map_err(|_| SessionError::InvalidHeader("identity key must be 32 bytes".into()))?;
    let our_identity_x = ed25519_secret_to_x25519(&identity_priv_bytes);

    // Mirror the initiator's DH1..DH4 by commutativity:
    //   DH1 = dh(EK_priv, IK_B_pub)  = dh(IK_B_priv, EK_pub)
    //   DH2 = dh(EK_priv, SPK_B_pub) = dh(SPK_B_priv, EK_pub)
    //   DH3 = dh(IK_A_priv, SPK_B_pub) = dh(SPK_B_priv, IK_A_pub)   (optional)
    //   DH4 = dh(EK_priv, OPK_B_pub) = dh(OPK_B_priv, EK_pub)       (optional)
    // DH1 always uses our own identity key, unconditionally — only DH3
    // depends on whether the initiator had one to contribute.
    let dh1 = our_identity_x.diffie_hellman(&ek_a_pub);
    let dh2 = dh::dh(&spk_priv_bytes, ek_a_pub.as_bytes())?;

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(&dh2);

    if peer_included_dh3 {
        let dh3 = dh::dh(&spk_priv_bytes, sender_identity_x.as_bytes())?;
        ikm.extend_from_slice(&dh3);
    }

    if let Some(otk_priv) = our_one_time_prekey_priv {
        let otk_priv_bytes: [u8; 32] = otk_priv
            .expose_material()
            .try_into()
            .map_err(|_| SessionError::InvalidHeader("one-time prekey must be 32 bytes".into()))?;
        let dh4 = dh::dh(&otk_priv_bytes, ek_a_pub.as_bytes())?;
        ikm.extend_from_slice(&dh4);
    }

    let mut root_key = [0u8; 32];
    kdf::hkdf(&ikm, salt, ROOT_KEY_INFO, &mut root_key)?;
    ikm.zeroize();
    Ok(root_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonet_registry::DeviceState;

    #[test]
    fn x3dh_roundtrip_with_one_time_prekey() {
        let engine = Engine::new();
        let alice = DeviceState::register(&engine, "alice", "device-1", 5).unwrap();
        let mut bob = DeviceState::register(&engine, "bob", "device-1", 5).unwrap();
        let bob_bundle = bob.sign_bundle(&engine).unwrap();
        let alice_bundle = alice.sign_bundle(&engine).unwrap();

        let result = initiate(&engine, &alice, Some(&alice.identity_priv), &bob_bundle).unwrap();
        let consumed_id = result.consumed_opk_id.clone().expect("an OTK was advertised");
        let otk_priv = bob.consume_one_time_prekey_priv(&consumed_id);
        assert!(otk_priv.is_some());

        let bob_spk_priv: [u8; 32] = bob.signed_prekey_priv.expose_material().try_into().unwrap();
        let bob_spk_priv_key = sonet_crypto::CryptoKey::new(
            sonet_crypto::Algorithm::X25519,
            bob_spk_priv.to_vec(),
            "bob",
            "device-1",
            chrono::Duration::days(30),
            false,
        );

        let responder_root = respond(
            &engine,
            &bob,
            &bob_spk_priv_key,
            otk_priv.as_ref(),
            &alice_bundle.identity_key_pub_hex,
            &result.ephemeral_pub,
            &result.salt,
            true,
        )
        .unwrap();
        assert_eq!(responder_root, result.root_key);
    }

    #[test]
    fn initiate_rejects_tampered_bundle() {
        let engine = Engine::new();
        let alice = DeviceState::register(&engine, "alice2", "device-1", 1).unwrap();
        let bob = DeviceState::register(&engine, "bob2", "device-1", 1).unwrap();
        let mut bundle = bob.sign_bundle(&engine).unwrap();
        let mut raw = hex::decode(&bundle.signed_prekey_pub_hex).unwrap();
        raw[0] ^= 0x01;
        bundle.signed_prekey_pub_hex = hex::encode(raw);

        let result = initiate(&engine, &alice, Some(&alice.identity_priv), &bundle);
        assert!(matches!(result, Err(SessionError::InvalidSignature)));
    }

    #[test]
    fn initiate_without_identity_private_omits_dh3_and_warns() {
        let engine = Engine::new();
        let alice = DeviceState::register(&engine, "alice3", "device-1", 1).unwrap();
        let mut bob = DeviceState::register(&engine, "bob3", "device-1", 1).unwrap();
        let alice_bundle = alice.sign_bundle(&engine).unwrap();
        let bob_bundle = bob.sign_bundle(&engine).unwrap();

        let result = initiate(&engine, &alice, None, &bob_bundle).unwrap();
        assert_ne!(result.root_key, [0u8; 32]);

        let consumed_id = result.consumed_opk_id.clone().expect("an OTK was advertised");
        let otk_priv = bob.consume_one_time_prekey_priv(&consumed_id);

        let bob_spk_priv: [u8; 32] = bob.signed_prekey_priv.expose_material().try_into().unwrap();
        let bob_spk_priv_key = sonet_crypto::CryptoKey::new(
            sonet_crypto::Algorithm::X25519,
            bob_spk_priv.to_vec(),
            "bob3",
            "device-1",
            chrono::Duration::days(30),
            false,
        );

        let responder_root = respond(
            &engine,
            &bob,
            &bob_spk_priv_key,
            otk_priv.as_ref(),
            &alice_bundle.identity_key_pub_hex,
            &result.ephemeral_pub,
            &result.salt,
            false,
        )
        .unwrap();
        assert_eq!(responder_root, result.root_key);
    }

    #[test]
    fn initiate_without_one_time_prekey_still_succeeds() {
        let engine = Engine::new();
        let alice = DeviceState::register(&engine, "alice4", "device-1", 0).unwrap();
        let bob = DeviceState::register(&engine, "bob4", "device-1", 0).unwrap();
        let bundle = bob.sign_bundle(&engine).unwrap();

        let result = initiate(&engine, &alice, Some(&alice.identity_priv), &bundle).unwrap();
        assert!(result.consumed_opk_id.is_none());
    }
}
