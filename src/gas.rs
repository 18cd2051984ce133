use ethers::types::U256;

/// Gas parameters applied to an operation (or sponsor transaction) before
/// signing.
#[derive(Clone, Copy, Debug)]
pub struct GasValues {
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    /// Gas limit for plain sponsor transactions (authorize / initialize).
    pub tx_gas_limit: U256,
}

/// Source of gas parameters for the submitter.
pub trait GasEstimator {
    fn gas_values(&self) -> GasValues;
}

/// Fixed placeholder values.
///
/// TODO: estimate dynamically (eth_estimateUserOperationGas via the bundler
/// and eth_gasPrice for the fee fields) instead of these constants.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedGasEstimator;

impl GasEstimator for FixedGasEstimator {
    fn gas_values(&self) -> GasValues {
        GasValues {
            verification_gas_limit: U256::from(1_048_576u64),
            call_gas_limit: U256::from(327_680u64),
            pre_verification_gas: U256::from(100_000u64),
            max_priority_fee_per_gas: U256::from(1_500_000_000u64),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            tx_gas_limit: U256::from(500_000u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pack_gas_pair;

    #[test]
    fn fixed_values_fit_the_packed_fields() {
        let gas = FixedGasEstimator.gas_values();
        assert!(pack_gas_pair(gas.verification_gas_limit, gas.call_gas_limit).is_ok());
        assert!(pack_gas_pair(gas.max_priority_fee_per_gas, gas.max_fee_per_gas).is_ok());
    }
}
