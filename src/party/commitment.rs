use crate::party::error::{MpcError, MpcResult};
use rand::{CryptoRng, Rng};
use sha2::{Digest, Sha256};

const COMMITMENT_SEC_PARAM: usize = 128 / 8;
const SHA256_OUTPUT_SIZE: usize = 256 / 8;

pub const COMMITMENT_SIZE: usize = COMMITMENT_SEC_PARAM + SHA256_OUTPUT_SIZE;

/// Hash-based commitment `r || SHA256(r || msg)` with a fresh 128-bit `r`.
pub fn commit<Random: Rng + CryptoRng>(rand: &mut Random, msg: &[u8]) -> Vec<u8> {
    let mut commitment = [0u8; COMMITMENT_SIZE];
    rand.fill_bytes(&mut commitment[..COMMITMENT_SEC_PARAM]);
    let mut hasher = Sha256::new();
    hasher.update(&commitment[..COMMITMENT_SEC_PARAM]);
    hasher.update(msg);

    let hash = hasher.finalize();
    commitment[COMMITMENT_SEC_PARAM..].copy_from_slice(&hash);
    Vec::from(commitment)
}

pub fn open(commitment: &[u8], msg: &[u8]) -> MpcResult<()> {
    if commitment.len() != COMMITMENT_SIZE {
        return Err(MpcError::Commitment);
    }
    let mut hasher = Sha256::new();
    hasher.update(&commitment[..COMMITMENT_SEC_PARAM]);
    hasher.update(msg);
    let hash = hasher.finalize();

    if commitment[COMMITMENT_SEC_PARAM..] != hash[..] {
        return Err(MpcError::Commitment);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::party::commitment::{commit, open};
    use crate::party::error::MpcError;
    use rand::thread_rng;

    #[test]
    fn correctness() {
        let mut rng = thread_rng();
        let message = "This is a message I commit to.".as_bytes();
        for _ in 0..10 {
            let commitment = commit(&mut rng, message);
            open(&commitment, message).unwrap()
        }
    }

    #[test]
    fn soundness() {
        let mut rng = thread_rng();
        let mut message = "This is a message I commit to.".as_bytes().to_vec();

        let mut commitment = commit(&mut rng, &message);

        // try open different message
        message[5] ^= 0x4;
        assert!(matches!(open(&commitment, &message), Err(MpcError::Commitment)));

        message[5] ^= 0x4;
        // try different commitment
        commitment[3] ^= 0x80;
        assert!(matches!(open(&commitment, &message), Err(MpcError::Commitment)));

        // truncated commitment
        assert!(matches!(open(&commitment[1..], &message), Err(MpcError::Commitment)));
    }
}
