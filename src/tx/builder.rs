//! Transaction assembly
//!
//! All builders are pure: no I/O, no hidden state. Nonce selection and gas
//! pricing are the caller's decisions.

use super::gas::GasParams;
use super::types::TransactionRequest;
use crate::error::{TxError, TxResult};

use ethers::types::{Address, Bytes, U256};

/// Builds well-formed transaction requests
pub struct TransactionBuilder;

impl TransactionBuilder {
    /// Plain value transfer
    pub fn build_transfer(to: Address, value: U256, nonce: u64, gas: GasParams) -> TransactionRequest {
        TransactionRequest::new(
            Some(to),
            value,
            nonce,
            gas.gas_limit,
            gas.gas_price,
            Bytes::default(),
        )
    }

    /// Zero-value self-transfer reusing a stuck transaction's nonce.
    ///
    /// `gas.gas_price` must already exceed the stuck transaction's price;
    /// the builder does not know what that price was.
    pub fn build_cancellation(self_address: Address, nonce: u64, gas: GasParams) -> TransactionRequest {
        Self::build_transfer(self_address, U256::zero(), nonce, gas)
    }

    /// Contract creation; `init_code_with_args` must already carry the
    /// ABI-encoded constructor arguments
    pub fn build_deployment(
        init_code_with_args: Bytes,
        nonce: u64,
        gas: GasParams,
    ) -> TxResult<TransactionRequest> {
        if init_code_with_args.is_empty() {
            return Err(TxError::MalformedRequest(
                "contract creation requires non-empty init code".to_string(),
            ));
        }

        Ok(TransactionRequest::new(
            None,
            U256::zero(),
            nonce,
            gas.gas_limit,
            gas.gas_price,
            init_code_with_args,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gas(price: u64) -> GasParams {
        GasParams::transfer(U256::from(price)).unwrap()
    }

    #[test]
    fn test_cancellations_differ_only_in_gas_price() {
        let me = Address::repeat_byte(0x42);
        let a = TransactionBuilder::build_cancellation(me, 5, gas(1_500_000_000));
        let b = TransactionBuilder::build_cancellation(me, 5, gas(3_000_000_000));

        assert_eq!(a.to(), b.to());
        assert_eq!(a.to(), Some(me));
        assert_eq!(a.value(), U256::zero());
        assert_eq!(a.value(), b.value());
        assert_eq!(a.nonce(), b.nonce());
        assert_eq!(a.gas_limit(), b.gas_limit());
        assert_eq!(a.data(), b.data());
        assert!(b.gas_price() > a.gas_price());
        assert_ne!(a, b);
    }

    #[test]
    fn test_transfer() {
        let to = Address::repeat_byte(0x01);
        let tx = TransactionBuilder::build_transfer(to, U256::exp10(18), 9, gas(1));
        assert_eq!(tx.to(), Some(to));
        assert_eq!(tx.value(), U256::exp10(18));
        assert_eq!(tx.nonce(), 9);
        assert!(tx.data().is_empty());
    }

    #[test]
    fn test_deployment_carries_init_code_without_recipient() {
        let code = Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]);
        let gas = GasParams::new(3_000_000, U256::from(3_000_000_000u64)).unwrap();
        let tx = TransactionBuilder::build_deployment(code.clone(), 7, gas).unwrap();

        assert!(tx.is_contract_creation());
        assert_eq!(tx.data(), &code);
        assert_eq!(tx.nonce(), 7);
        assert_eq!(tx.gas_limit(), 3_000_000);
    }

    #[test]
    fn test_deployment_rejects_empty_init_code() {
        let gas = GasParams::new(3_000_000, U256::one()).unwrap();
        let err = TransactionBuilder::build_deployment(Bytes::default(), 0, gas).unwrap_err();
        assert!(matches!(err, TxError::MalformedRequest(_)));
    }
}
