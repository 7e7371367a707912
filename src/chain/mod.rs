pub mod assets;
pub use assets::{AssetInfo, AssetTable};

pub mod network;
pub use network::Network;

pub mod wallet;
pub use wallet::{LocalWallet, WatchOnlyWallet, Wallet, WalletError};
