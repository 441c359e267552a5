//! Structural validation of ceremony init payloads.

use crate::{constants::ACCEPTED_COMMITTEE_SIZES, error::Error, wire::Init};

/// Validate the structural parameters of an init payload.
///
/// Pure over its input. Checks, in order: the committee size is one of the
/// accepted `3f+1` values, operator ids are strictly ascending, the
/// threshold equals `2f+1`, and the withdrawal credentials are 32 bytes.
pub fn validate_init(init: &Init) -> Result<(), Error> {
    let n = init.operators.len();
    if !ACCEPTED_COMMITTEE_SIZES.contains(&n) {
        return Err(Error::ThresholdSetInvalid);
    }

    let ordered = init
        .operators
        .windows(2)
        .all(|pair| pair[0].id < pair[1].id);
    if !ordered {
        return Err(Error::OperatorsNotUniqueOrOrdered);
    }

    let f = (n as u64 - 1) / 3;
    if init.threshold != 2 * f + 1 {
        return Err(Error::ThresholdSetInvalid);
    }

    if init.withdrawal_credentials.len() != 32 {
        return Err(Error::Malformed(commonware_codec::Error::Invalid(
            "init",
            "withdrawal credentials must be 32 bytes",
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Operator;

    fn operators(ids: &[u64]) -> Vec<Operator> {
        ids.iter()
            .map(|&id| Operator {
                id,
                public_key: vec![id as u8; 32],
            })
            .collect()
    }

    fn init_with(operators: Vec<Operator>, threshold: u64) -> Init {
        let mut withdrawal_credentials = vec![0u8; 32];
        withdrawal_credentials[0] = 0x01;
        Init {
            operators,
            threshold,
            withdrawal_credentials,
            fork: alloy_primitives::FixedBytes([0, 0, 16, 32]),
            owner: alloy_primitives::Address::repeat_byte(0xAA),
            nonce: 0,
        }
    }

    #[test]
    fn valid_committees() {
        for (n, t) in [(4u64, 3u64), (7, 5), (10, 7), (13, 9)] {
            let ids: Vec<u64> = (1..=n).collect();
            assert!(validate_init(&init_with(operators(&ids), t)).is_ok());
        }
    }

    #[test]
    fn disordered_operators() {
        let err = validate_init(&init_with(operators(&[1, 2, 4, 3]), 3)).unwrap_err();
        assert_eq!(err.to_string(), "operators not unique or not ordered");
    }

    #[test]
    fn duplicate_operators() {
        let err = validate_init(&init_with(operators(&[1, 2, 3, 3]), 3)).unwrap_err();
        assert_eq!(err.to_string(), "operators not unique or not ordered");
    }

    #[test]
    fn empty_operator_set() {
        let err = validate_init(&init_with(operators(&[]), 3)).unwrap_err();
        assert_eq!(err.to_string(), "threshold set is invalid");
    }

    #[test]
    fn non_3f_plus_1_committee() {
        let err = validate_init(&init_with(operators(&[1, 2, 3]), 3)).unwrap_err();
        assert_eq!(err.to_string(), "threshold set is invalid");

        let err = validate_init(&init_with(operators(&[1, 2, 3, 4, 5]), 3)).unwrap_err();
        assert_eq!(err.to_string(), "threshold set is invalid");
    }

    #[test]
    fn non_2f_plus_1_threshold() {
        let err = validate_init(&init_with(operators(&[1, 2, 3, 4]), 2)).unwrap_err();
        assert_eq!(err.to_string(), "threshold set is invalid");
    }

    #[test]
    fn short_withdrawal_credentials() {
        let mut init = init_with(operators(&[1, 2, 3, 4]), 3);
        init.withdrawal_credentials = vec![0x01; 20];
        assert!(validate_init(&init).is_err());
    }
}
