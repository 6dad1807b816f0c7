//! Elliptic curve operations on secp256k1
//!
//! Signing sits behind the `Ecc` trait so transactions can be measured with
//! fixed-size dummy signatures before the real keys are involved. Schnorr
//! signatures follow the BCH scheme: R is chosen with a quadratic residue y
//! and the challenge commits to R.x, the compressed pubkey and the message.

use k256::{
    AffinePoint, FieldBytes, ProjectivePoint, PublicKey, Scalar, SecretKey, U256,
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::hazmat::{PrehashSigner, PrehashVerifier},
    },
    elliptic_curve::{PrimeField, ops::Reduce, point::AffineCoordinates, sec1::ToEncodedPoint},
};
use num_bigint::BigUint;
use num_traits::One;
use util::err_str;

use crate::{errors::CovenantError, hash::sha256};

/// A serialized secret key
pub type SecretKeyBytes = [u8; 32];
/// A compressed public key
pub type Pubkey = [u8; 33];

/// Length of a BCH Schnorr signature, without sighash flags
pub const SCHNORR_SIG_LEN: usize = 64;
/// Length of the largest DER encoded ECDSA signature, without sighash flags
pub const MAX_ECDSA_SIG_LEN: usize = 73;

/// Additional data mixed into the Schnorr nonce
const SCHNORR_NONCE_TAG: &[u8] = b"Schnorr+SHA256  ";
/// The field prime of secp256k1
const FIELD_PRIME_HEX: &str = "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f";

/// Key derivation and signing
pub trait Ecc: Send + Sync {
    /// Derive the compressed pubkey of a secret key
    fn derive_pubkey(&self, sk: &SecretKeyBytes) -> Result<Pubkey, CovenantError>;
    /// Sign a 32-byte digest with ECDSA, DER encoded with a low S
    fn ecdsa_sign(&self, sk: &SecretKeyBytes, msg: &[u8; 32]) -> Result<Vec<u8>, CovenantError>;
    /// Sign a 32-byte digest with BCH Schnorr
    fn schnorr_sign(&self, sk: &SecretKeyBytes, msg: &[u8; 32]) -> Result<Vec<u8>, CovenantError>;
}

// ------------
// | k256 Ecc |
// ------------

/// The `Ecc` implementation backed by `k256`
#[derive(Clone, Copy, Debug, Default)]
pub struct K256Ecc;

impl Ecc for K256Ecc {
    fn derive_pubkey(&self, sk: &SecretKeyBytes) -> Result<Pubkey, CovenantError> {
        let sk = SecretKey::from_slice(sk).map_err(err_str!(CovenantError::Signing))?;
        Ok(compress(&sk.public_key()))
    }

    fn ecdsa_sign(&self, sk: &SecretKeyBytes, msg: &[u8; 32]) -> Result<Vec<u8>, CovenantError> {
        let signing_key = SigningKey::from_slice(sk).map_err(err_str!(CovenantError::Signing))?;
        let sig: Signature =
            signing_key.sign_prehash(msg).map_err(err_str!(CovenantError::Signing))?;
        let sig = sig.normalize_s().unwrap_or(sig);
        Ok(sig.to_der().as_bytes().to_vec())
    }

    fn schnorr_sign(&self, sk: &SecretKeyBytes, msg: &[u8; 32]) -> Result<Vec<u8>, CovenantError> {
        let secret = SecretKey::from_slice(sk).map_err(err_str!(CovenantError::Signing))?;
        let x: Scalar = *secret.to_nonzero_scalar();
        let pk = compress(&secret.public_key());

        let mut nonce_data = sk.to_vec();
        nonce_data.extend_from_slice(msg);
        nonce_data.extend_from_slice(SCHNORR_NONCE_TAG);
        let mut k = reduce_hash(&nonce_data);
        if k == Scalar::ZERO {
            return Err(CovenantError::signing("schnorr nonce is zero"));
        }

        let r_point = (ProjectivePoint::GENERATOR * k).to_affine();
        if !has_square_y(&r_point)? {
            k = -k;
        }
        let r_x = r_point.x();

        let e = challenge(r_x.as_slice(), &pk, msg);
        let s = k + e * x;

        let mut sig = r_x.to_vec();
        sig.extend_from_slice(s.to_repr().as_slice());
        Ok(sig)
    }
}

/// Verify a BCH Schnorr signature over a 32-byte digest
pub fn verify_schnorr(pk: &[u8], msg: &[u8; 32], sig: &[u8]) -> bool {
    verify_schnorr_inner(pk, msg, sig).unwrap_or(false)
}

/// Fallible body of `verify_schnorr`
fn verify_schnorr_inner(pk: &[u8], msg: &[u8; 32], sig: &[u8]) -> Result<bool, CovenantError> {
    if sig.len() != SCHNORR_SIG_LEN {
        return Ok(false);
    }
    let pubkey = PublicKey::from_sec1_bytes(pk).map_err(err_str!(CovenantError::Signing))?;
    let (r, s) = sig.split_at(32);
    let s: Option<Scalar> = Scalar::from_repr(*FieldBytes::from_slice(s)).into();
    let Some(s) = s else {
        return Ok(false);
    };

    let e = challenge(r, &compress(&pubkey), msg);
    let r_point = ProjectivePoint::GENERATOR * s - pubkey.to_projective() * e;
    if r_point == ProjectivePoint::IDENTITY {
        return Ok(false);
    }
    let r_point = r_point.to_affine();
    Ok(has_square_y(&r_point)? && r_point.x().as_slice() == r)
}

/// Verify a DER encoded ECDSA signature over a 32-byte digest
pub fn verify_ecdsa(pk: &[u8], msg: &[u8; 32], sig: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(pk) else {
        return false;
    };
    let Ok(sig) = Signature::from_der(sig) else {
        return false;
    };
    verifying_key.verify_prehash(msg, &sig).is_ok()
}

/// Compressed SEC1 encoding of a pubkey
fn compress(pk: &PublicKey) -> Pubkey {
    let mut out = [0u8; 33];
    out.copy_from_slice(pk.to_encoded_point(true).as_bytes());
    out
}

/// sha256 of the data, reduced into a scalar
fn reduce_hash(data: &[u8]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(sha256(data)))
}

/// The Schnorr challenge e = H(R.x || P || m)
fn challenge(r_x: &[u8], pk: &Pubkey, msg: &[u8; 32]) -> Scalar {
    let mut data = Vec::with_capacity(32 + 33 + 32);
    data.extend_from_slice(r_x);
    data.extend_from_slice(pk);
    data.extend_from_slice(msg);
    reduce_hash(&data)
}

/// Whether the y coordinate of the point is a quadratic residue mod p
fn has_square_y(point: &AffinePoint) -> Result<bool, CovenantError> {
    let encoded = point.to_encoded_point(false);
    let y = encoded.y().ok_or_else(|| CovenantError::signing("point at infinity"))?;
    let p = BigUint::parse_bytes(FIELD_PRIME_HEX.as_bytes(), 16)
        .ok_or_else(|| CovenantError::signing("invalid field prime"))?;
    let exp = (&p - 1u32) >> 1;
    Ok(BigUint::from_bytes_be(y).modpow(&exp, &p).is_one())
}

// -------------
// | Dummy Ecc |
// -------------

/// An `Ecc` producing zeroed keys and signatures of the maximum size, used
/// to measure transactions before signing
#[derive(Clone, Copy, Debug, Default)]
pub struct EccDummy;

impl Ecc for EccDummy {
    fn derive_pubkey(&self, _sk: &SecretKeyBytes) -> Result<Pubkey, CovenantError> {
        Ok([0; 33])
    }

    fn ecdsa_sign(&self, _sk: &SecretKeyBytes, _msg: &[u8; 32]) -> Result<Vec<u8>, CovenantError> {
        Ok(vec![0; MAX_ECDSA_SIG_LEN])
    }

    fn schnorr_sign(&self, _sk: &SecretKeyBytes, _msg: &[u8; 32]) -> Result<Vec<u8>, CovenantError> {
        Ok(vec![0; SCHNORR_SIG_LEN])
    }
}
