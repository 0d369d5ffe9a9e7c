mod contract;

pub use contract::Contract;
