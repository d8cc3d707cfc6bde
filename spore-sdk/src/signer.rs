use crate::error::ComposeError;
use crate::skeleton::{LockGroup, TransactionSkeleton};

use ckb_hash::new_blake2b;
use ckb_sdk::constants::{SECP_SIGNATURE_SIZE, SIGHASH_TYPE_HASH};
use ckb_sdk::util::blake160;
use ckb_sdk::SECP256K1;
use ckb_types::{
    bytes::Bytes,
    core::ScriptHashType,
    packed::{self, Byte32, Script, WitnessArgs},
    prelude::*,
    H256,
};
use secp256k1::{Message, PublicKey, SecretKey};

/// Produces a 65-byte recoverable signature for its own lock script. The
/// composition core only ever treats this as a pure function over digests;
/// key custody stays on the caller's side of the boundary.
pub trait WitnessSigner {
    fn lock_script(&self) -> Script;
    fn sign_message(&self, digest: &[u8; 32]) -> Result<[u8; 65], ComposeError>;
}

/// Sighash signer over a raw secp256k1 key.
pub struct SecpSigner {
    privkey: SecretKey,
}

impl SecpSigner {
    pub fn from_privkey(privkey: &H256) -> Result<Self, ComposeError> {
        let privkey = SecretKey::from_slice(privkey.as_bytes())
            .map_err(|err| ComposeError::Signing(err.to_string()))?;
        Ok(SecpSigner { privkey })
    }

    pub fn pubkey(&self) -> PublicKey {
        PublicKey::from_secret_key(&SECP256K1, &self.privkey)
    }
}

impl WitnessSigner for SecpSigner {
    fn lock_script(&self) -> Script {
        let args = blake160(&self.pubkey().serialize());
        Script::new_builder()
            .code_hash(SIGHASH_TYPE_HASH.pack())
            .hash_type(ScriptHashType::Type.into())
            .args(Bytes::from(args.as_bytes().to_vec()).pack())
            .build()
    }

    fn sign_message(&self, digest: &[u8; 32]) -> Result<[u8; 65], ComposeError> {
        let message =
            Message::from_slice(digest).map_err(|err| ComposeError::Signing(err.to_string()))?;
        let signature = SECP256K1.sign_ecdsa_recoverable(&message, &self.privkey);
        let (recovery_id, data) = signature.serialize_compact();
        let mut serialized = [0u8; 65];
        serialized[..64].copy_from_slice(&data);
        serialized[64] = recovery_id.to_i32() as u8;
        Ok(serialized)
    }
}

/// Where a skeleton stands between composition and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningStatus {
    Unsigned,
    PartiallySigned { signed_locks: Vec<Byte32> },
    FullySigned,
}

pub fn signing_status(skeleton: &TransactionSkeleton) -> SigningStatus {
    let groups = skeleton.lock_groups();
    let signed: Vec<Byte32> = groups
        .iter()
        .filter(|group| group_is_signed(skeleton, group))
        .map(|group| group.script.calc_script_hash())
        .collect();
    if signed.is_empty() {
        SigningStatus::Unsigned
    } else if signed.len() == groups.len() {
        SigningStatus::FullySigned
    } else {
        SigningStatus::PartiallySigned {
            signed_locks: signed,
        }
    }
}

fn group_is_signed(skeleton: &TransactionSkeleton, group: &LockGroup) -> bool {
    skeleton
        .witnesses()
        .get(group.input_indices[0])
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| WitnessArgs::from_slice(&raw.raw_data()).ok())
        .map(|args| !is_placeholder(&args))
        .unwrap_or(false)
}

/// One signing pass: fills the placeholder witness of every lock group owned
/// by `signer`, leaving every other slot byte-identical. A pass by a signer
/// owning no unsigned slot returns the skeleton unchanged, so passes compose
/// in any order and repeating a pass is harmless.
pub fn sign_skeleton(
    skeleton: &TransactionSkeleton,
    signer: &dyn WitnessSigner,
) -> Result<TransactionSkeleton, ComposeError> {
    let mut signed = skeleton.clone();
    signed.fill_witness_placeholders();

    let own_lock = signer.lock_script();
    let tx_hash = signed.build_tx().hash();
    let mut filled = 0usize;
    for group in signed.lock_groups() {
        if group.script != own_lock {
            continue;
        }
        let first = group.input_indices[0];
        let witness_args = parse_witness(signed.witnesses(), first)?;
        if !is_placeholder(&witness_args) {
            continue;
        }
        let digest = lock_group_digest(&signed, &group, &tx_hash)?;
        let signature = signer.sign_message(&digest)?;
        let witness = witness_args
            .as_builder()
            .lock(Some(Bytes::from(signature.to_vec())).pack())
            .build();
        signed.set_witness(first, witness.as_bytes().pack());
        filled += 1;
    }

    let lock_hash: H256 = own_lock.calc_script_hash().unpack();
    if filled == 0 {
        log::debug!("no unsigned witness slot for lock {:#x}", lock_hash);
    } else {
        log::info!("filled {} witness slot(s) for lock {:#x}", filled, lock_hash);
    }
    Ok(signed)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub send: bool,
}

#[derive(Debug, Clone)]
pub struct SignOutcome {
    pub skeleton: TransactionSkeleton,
    pub tx_hash: Option<H256>,
}

/// Signs with `signer` and, when `options.send` is set, submits the result.
/// Submission refuses anything short of a fully signed skeleton; signing-only
/// callers get the updated skeleton back for the next party.
pub fn sign_and_or_send(
    skeleton: &TransactionSkeleton,
    signer: &dyn WitnessSigner,
    ckb_uri: &str,
    options: SendOptions,
) -> Result<SignOutcome, ComposeError> {
    let signed = sign_skeleton(skeleton, signer)?;
    if !options.send {
        return Ok(SignOutcome {
            skeleton: signed,
            tx_hash: None,
        });
    }
    if signing_status(&signed) != SigningStatus::FullySigned {
        return Err(ComposeError::Signing(
            "refusing to send a transaction that is not fully signed".to_owned(),
        ));
    }
    let tx_hash = crate::query::send_transaction(ckb_uri, signed.build_tx())?;
    Ok(SignOutcome {
        skeleton: signed,
        tx_hash: Some(tx_hash),
    })
}

/// Sighash-all digest for one lock group: the tx hash, then the group's first
/// witness with a zeroed lock field, then the group's remaining witnesses and
/// any witnesses beyond the input count, each length-prefixed.
fn lock_group_digest(
    skeleton: &TransactionSkeleton,
    group: &LockGroup,
    tx_hash: &Byte32,
) -> Result<[u8; 32], ComposeError> {
    let witnesses = skeleton.witnesses();
    let first = group.input_indices[0];
    let witness_args = parse_witness(witnesses, first)?;
    let zero_lock = Bytes::from(vec![0u8; SECP_SIGNATURE_SIZE]);
    let init_witness = witness_args
        .as_builder()
        .lock(Some(zero_lock).pack())
        .build()
        .as_bytes();

    let mut hasher = new_blake2b();
    hasher.update(tx_hash.as_slice());
    hasher.update(&(init_witness.len() as u64).to_le_bytes());
    hasher.update(&init_witness);
    for index in group.input_indices.iter().skip(1) {
        let raw = witnesses[*index].raw_data();
        hasher.update(&(raw.len() as u64).to_le_bytes());
        hasher.update(&raw);
    }
    for witness in witnesses.iter().skip(skeleton.inputs().len()) {
        let raw = witness.raw_data();
        hasher.update(&(raw.len() as u64).to_le_bytes());
        hasher.update(&raw);
    }
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);
    Ok(digest)
}

fn parse_witness(witnesses: &[packed::Bytes], index: usize) -> Result<WitnessArgs, ComposeError> {
    let raw = witnesses
        .get(index)
        .ok_or_else(|| ComposeError::Signing(format!("missing witness slot {}", index)))?;
    if raw.is_empty() {
        return Ok(WitnessArgs::default());
    }
    WitnessArgs::from_slice(&raw.raw_data())
        .map_err(|err| ComposeError::Signing(err.to_string()))
}

fn is_placeholder(witness_args: &WitnessArgs) -> bool {
    match witness_args.lock().to_opt() {
        Some(lock) => lock.raw_data().as_ref() == &[0u8; SECP_SIGNATURE_SIZE][..],
        None => true,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use spore_format::types::LiveCell;

    use ckb_types::packed::{CellOutput, OutPoint};
    use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};

    const ALICE_KEY: H256 = H256([0x11; 32]);
    const BOB_KEY: H256 = H256([0x22; 32]);

    fn signer(key: &H256) -> SecpSigner {
        SecpSigner::from_privkey(key).unwrap()
    }

    fn cell_for(lock: &Script, tx_byte: u8) -> LiveCell {
        LiveCell {
            out_point: OutPoint::new(Byte32::from_slice(&[tx_byte; 32]).unwrap(), 0),
            output: CellOutput::new_builder()
                .capacity(20_000_000_000u64.pack())
                .lock(lock.clone())
                .build(),
            data: Bytes::new(),
        }
    }

    fn two_party_skeleton() -> TransactionSkeleton {
        let alice = signer(&ALICE_KEY);
        let bob = signer(&BOB_KEY);
        let mut skeleton = TransactionSkeleton::new();
        skeleton.add_input(cell_for(&alice.lock_script(), 1)).unwrap();
        skeleton.add_input(cell_for(&bob.lock_script(), 2)).unwrap();
        skeleton.add_input(cell_for(&bob.lock_script(), 3)).unwrap();
        skeleton.add_output(
            CellOutput::new_builder()
                .capacity(30_000_000_000u64.pack())
                .lock(alice.lock_script())
                .build(),
            Bytes::new(),
        );
        skeleton.fill_witness_placeholders();
        skeleton
    }

    #[test]
    fn test_sequential_passes_reach_fully_signed() {
        let alice = signer(&ALICE_KEY);
        let bob = signer(&BOB_KEY);
        let skeleton = two_party_skeleton();
        assert_eq!(signing_status(&skeleton), SigningStatus::Unsigned);

        let after_alice = sign_skeleton(&skeleton, &alice).unwrap();
        match signing_status(&after_alice) {
            SigningStatus::PartiallySigned { signed_locks } => {
                assert_eq!(signed_locks, vec![alice.lock_script().calc_script_hash()]);
            }
            status => panic!("unexpected status: {:?}", status),
        }

        let after_bob = sign_skeleton(&after_alice, &bob).unwrap();
        assert_eq!(signing_status(&after_bob), SigningStatus::FullySigned);

        // alice's witness survived bob's pass byte-identical
        assert_eq!(
            after_alice.witnesses()[0].as_slice(),
            after_bob.witnesses()[0].as_slice()
        );
        // bob's group signs at its first input only; the second slot stays empty
        assert!(!after_bob.witnesses()[1].is_empty());
        assert!(after_bob.witnesses()[2].is_empty());
    }

    #[test]
    fn test_pass_without_owned_slot_is_noop() {
        let alice = signer(&ALICE_KEY);
        let skeleton = two_party_skeleton();

        let once = sign_skeleton(&skeleton, &alice).unwrap();
        let twice = sign_skeleton(&once, &alice).unwrap();
        for (a, b) in once.witnesses().iter().zip(twice.witnesses()) {
            assert_eq!(a.as_slice(), b.as_slice());
        }
    }

    #[test]
    fn test_signature_recovers_signer_pubkey() {
        let alice = signer(&ALICE_KEY);
        let skeleton = two_party_skeleton();
        let signed = sign_skeleton(&skeleton, &alice).unwrap();

        let witness = WitnessArgs::from_slice(&signed.witnesses()[0].raw_data()).unwrap();
        let lock_field = witness.lock().to_opt().unwrap().raw_data();
        assert_eq!(lock_field.len(), SECP_SIGNATURE_SIZE);

        // recompute the digest over the signed skeleton; zero-lock rules make
        // it identical to what the signer saw
        let tx_hash = signed.build_tx().hash();
        let groups = signed.lock_groups();
        let digest = lock_group_digest(&signed, &groups[0], &tx_hash).unwrap();

        let recovery_id = RecoveryId::from_i32(lock_field[64] as i32).unwrap();
        let signature =
            RecoverableSignature::from_compact(&lock_field[..64], recovery_id).unwrap();
        let message = Message::from_slice(&digest).unwrap();
        let recovered = SECP256K1.recover_ecdsa(&message, &signature).unwrap();
        assert_eq!(recovered, alice.pubkey());
    }

    #[test]
    fn test_send_requires_fully_signed() {
        let alice = signer(&ALICE_KEY);
        let skeleton = two_party_skeleton();
        let err = sign_and_or_send(
            &skeleton,
            &alice,
            "http://127.0.0.1:8114",
            SendOptions { send: true },
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::Signing(_)));

        // signing-only pass never touches the network
        let outcome = sign_and_or_send(
            &skeleton,
            &alice,
            "http://127.0.0.1:8114",
            SendOptions { send: false },
        )
        .unwrap();
        assert!(outcome.tx_hash.is_none());
    }
}
