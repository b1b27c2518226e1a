//! Gas parameters for legacy-priced transactions

use crate::error::{TxError, TxResult};

use ethers::types::U256;

/// Gas limit of a plain value transfer with no calldata
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Gas limit and price, both in the chain's smallest unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: u64,
    pub gas_price: U256,
}

impl GasParams {
    /// Create gas parameters, rejecting zero values
    pub fn new(gas_limit: u64, gas_price: U256) -> TxResult<Self> {
        if gas_limit == 0 {
            return Err(TxError::MalformedRequest(
                "gas limit must be greater than zero".to_string(),
            ));
        }
        if gas_price.is_zero() {
            return Err(TxError::MalformedRequest(
                "gas price must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            gas_limit,
            gas_price,
        })
    }

    /// Parameters for a plain transfer at the given price
    pub fn transfer(gas_price: U256) -> TxResult<Self> {
        Self::new(TRANSFER_GAS_LIMIT, gas_price)
    }

    /// Worst-case fee in the smallest unit
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit).saturating_mul(self.gas_price)
    }

    /// Whether these parameters price strictly above `other`
    pub fn outbids(&self, other: &GasParams) -> bool {
        self.gas_price > other.gas_price
    }
}
