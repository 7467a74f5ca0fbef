use super::{branch_opt_util, error::TwinPIRError, params::OPRF_GROUP_MODULUS};
use curve25519_dalek::{
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use rand::prelude::*;
use sha2::{Digest, Sha512};
use std::fmt::Debug;

/// Prime-order group, over which the verifying server evaluates an oblivious PRF, `F(k, x) = H(x)^k`.
///
/// The client blinds its own item, the server evaluates the blinded element with its secret key, and the client unblinds
/// the result, obtaining exactly what `server_eval_on_item` computes over the unblinded item, without the server ever seeing it.
pub trait OprfGroup: Send + Sync {
    type Element: Clone + Debug + PartialEq + Send + Sync;
    type Scalar: Clone + Debug + Send + Sync;

    fn hash_to_element(&self, item: &[u8]) -> Self::Element;
    fn generate_secret_key<R: RngCore + ?Sized>(&self, rng: &mut R) -> Self::Scalar;
    /// Returns the blinded element, along with the blinding factor which must be kept secret by the client.
    fn blind<R: RngCore + ?Sized>(&self, element: &Self::Element, rng: &mut R) -> (Self::Element, Self::Scalar);
    fn evaluate(&self, blinded: &Self::Element, secret_key: &Self::Scalar) -> Self::Element;
    fn unblind(&self, evaluated: &Self::Element, blinding_factor: &Self::Scalar) -> Result<Self::Element, TwinPIRError>;
    fn element_to_bytes(&self, element: &Self::Element) -> Vec<u8>;
    fn element_from_bytes(&self, bytes: &[u8]) -> Result<Self::Element, TwinPIRError>;

    /// Direct, unblinded evaluation. Only meant for building the Bloom filter over recovered candidates.
    fn server_eval_on_item(&self, item: &[u8], secret_key: &Self::Scalar) -> Self::Element {
        self.evaluate(&self.hash_to_element(item), secret_key)
    }
}

/// Discrete-log based OPRF over the multiplicative group of integers modulo a prime p. Exponents live modulo p - 1.
///
/// With the default p = 65521 this offers no real security, it's only good for demonstration and testing. Prefer
/// `RistrettoGroup` for anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModularGroup {
    modulus: u64,
}

#[inline(always)]
const fn mul_mod(a: u64, b: u64, modulus: u64) -> u64 {
    ((a as u128 * b as u128) % modulus as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut acc = 1 % modulus;
    base %= modulus;

    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, modulus);
        }
        base = mul_mod(base, base, modulus);
        exp >>= 1;
    }

    acc
}

const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Multiplicative inverse of `a` modulo `modulus`, if it exists.
fn inv_mod(a: u64, modulus: u64) -> Option<u64> {
    let (mut old_r, mut r) = (a as i128, modulus as i128);
    let (mut old_s, mut s) = (1i128, 0i128);

    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }

    if old_r == 1 { Some(old_s.rem_euclid(modulus as i128) as u64) } else { None }
}

const fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }

    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }

    true
}

impl ModularGroup {
    /// Creates the group modulo `modulus`, which must be a prime in [5, 2^32).
    pub fn new(modulus: u64) -> Result<ModularGroup, TwinPIRError> {
        if branch_opt_util::likely(modulus >= 5 && modulus < (1u64 << 32) && is_prime(modulus)) {
            Ok(ModularGroup { modulus })
        } else {
            Err(TwinPIRError::InvalidProtocolParameter("OPRF group modulus must be a prime in [5, 2^32)"))
        }
    }

    #[inline(always)]
    pub const fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Samples an exponent in [2, p - 2], invertible modulo p - 1.
    fn sample_invertible_exponent<R: RngCore + ?Sized>(&self, rng: &mut R) -> u64 {
        let exponent_modulus = self.modulus - 1;

        loop {
            let exponent = rng.random_range(2..exponent_modulus);
            if gcd(exponent, exponent_modulus) == 1 {
                break exponent;
            }
        }
    }
}

impl Default for ModularGroup {
    fn default() -> Self {
        ModularGroup { modulus: OPRF_GROUP_MODULUS }
    }
}

impl OprfGroup for ModularGroup {
    type Element = u64;
    type Scalar = u64;

    /// Interprets the item as a big-endian integer, reduced modulo p.
    fn hash_to_element(&self, item: &[u8]) -> u64 {
        item.iter().fold(0u64, |acc, &byte| ((((acc as u128) << 8) | byte as u128) % self.modulus as u128) as u64)
    }

    /// Secret key is invertible modulo p - 1, so evaluation permutes the group and distinct elements never collide.
    fn generate_secret_key<R: RngCore + ?Sized>(&self, rng: &mut R) -> u64 {
        self.sample_invertible_exponent(rng)
    }

    fn blind<R: RngCore + ?Sized>(&self, element: &u64, rng: &mut R) -> (u64, u64) {
        let blinding_factor = self.sample_invertible_exponent(rng);
        (pow_mod(*element, blinding_factor, self.modulus), blinding_factor)
    }

    fn evaluate(&self, blinded: &u64, secret_key: &u64) -> u64 {
        pow_mod(*blinded, *secret_key, self.modulus)
    }

    fn unblind(&self, evaluated: &u64, blinding_factor: &u64) -> Result<u64, TwinPIRError> {
        let inv_blinding_factor = inv_mod(*blinding_factor, self.modulus - 1).ok_or(TwinPIRError::InvalidOprfElement)?;
        Ok(pow_mod(*evaluated, inv_blinding_factor, self.modulus))
    }

    fn element_to_bytes(&self, element: &u64) -> Vec<u8> {
        element.to_le_bytes().to_vec()
    }

    fn element_from_bytes(&self, bytes: &[u8]) -> Result<u64, TwinPIRError> {
        let bytes: [u8; 8] = bytes.try_into().map_err(|_| TwinPIRError::InvalidOprfElement)?;
        let element = u64::from_le_bytes(bytes);

        if branch_opt_util::likely(element < self.modulus) {
            Ok(element)
        } else {
            Err(TwinPIRError::InvalidOprfElement)
        }
    }
}

const RISTRETTO_HASH_TO_GROUP_LABEL: &[u8] = b"twin_pir.oprf.ristretto255.hash_to_group";

/// OPRF over the prime-order ristretto255 group, with SHA-512 based hash-to-group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RistrettoGroup;

impl RistrettoGroup {
    fn sample_non_zero_scalar<R: RngCore + ?Sized>(rng: &mut R) -> Scalar {
        let mut wide_bytes = [0u8; 64];

        loop {
            rng.fill_bytes(&mut wide_bytes);

            let scalar = Scalar::from_bytes_mod_order_wide(&wide_bytes);
            if scalar != Scalar::ZERO {
                break scalar;
            }
        }
    }
}

impl OprfGroup for RistrettoGroup {
    type Element = RistrettoPoint;
    type Scalar = Scalar;

    fn hash_to_element(&self, item: &[u8]) -> RistrettoPoint {
        RistrettoPoint::from_hash(Sha512::new().chain_update(RISTRETTO_HASH_TO_GROUP_LABEL).chain_update(item))
    }

    fn generate_secret_key<R: RngCore + ?Sized>(&self, rng: &mut R) -> Scalar {
        Self::sample_non_zero_scalar(rng)
    }

    fn blind<R: RngCore + ?Sized>(&self, element: &RistrettoPoint, rng: &mut R) -> (RistrettoPoint, Scalar) {
        let blinding_factor = Self::sample_non_zero_scalar(rng);
        (element * blinding_factor, blinding_factor)
    }

    fn evaluate(&self, blinded: &RistrettoPoint, secret_key: &Scalar) -> RistrettoPoint {
        blinded * secret_key
    }

    fn unblind(&self, evaluated: &RistrettoPoint, blinding_factor: &Scalar) -> Result<RistrettoPoint, TwinPIRError> {
        if branch_opt_util::unlikely(*blinding_factor == Scalar::ZERO) {
            return Err(TwinPIRError::InvalidOprfElement);
        }

        Ok(evaluated * blinding_factor.invert())
    }

    fn element_to_bytes(&self, element: &RistrettoPoint) -> Vec<u8> {
        element.compress().to_bytes().to_vec()
    }

    fn element_from_bytes(&self, bytes: &[u8]) -> Result<RistrettoPoint, TwinPIRError> {
        CompressedRistretto::from_slice(bytes)
            .map_err(|_| TwinPIRError::InvalidOprfElement)?
            .decompress()
            .ok_or(TwinPIRError::InvalidOprfElement)
    }
}
