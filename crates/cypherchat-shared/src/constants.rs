/// Application name
pub const APP_NAME: &str = "CypherChat";

/// Namespace used for durable local storage (database file name, data dir)
pub const STORAGE_NAMESPACE: &str = "cypherchat";

/// Sepolia testnet chain id
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// Metadata sent with `wallet_addEthereumChain` when the wallet does not know Sepolia
pub const SEPOLIA_CHAIN_NAME: &str = "Sepolia Testnet";
pub const SEPOLIA_CURRENCY_NAME: &str = "Sepolia ETH";
pub const SEPOLIA_CURRENCY_SYMBOL: &str = "ETH";
pub const SEPOLIA_CURRENCY_DECIMALS: u8 = 18;
pub const SEPOLIA_EXPLORER_URL: &str = "https://sepolia.etherscan.io";
pub const SEPOLIA_PUBLIC_RPC_URL: &str = "https://rpc.sepolia.org";

/// Gas limit attached to every write; some mobile wallets under-estimate
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

/// Confirmations awaited after a write is mined
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Interval between receipt lookups while waiting for a transaction
pub const RECEIPT_POLL_INTERVAL_MS: u64 = 1_500;

/// Upper bound on waiting for a receipt
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;

/// Poll interval for the active conversation
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

/// Cap for the exponential poll backoff after consecutive failures
pub const DEFAULT_MAX_POLL_BACKOFF_SECS: u64 = 30;

/// Confirmed messages per page of conversation history
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Automatic resend policy for transient send failures
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 5;

/// EIP-1193 provider error codes
pub const EIP1193_USER_REJECTED: i64 = 4001;
pub const EIP1193_UNRECOGNIZED_CHAIN: i64 = 4902;

/// JSON-RPC error code used by geth-style nodes for reverts carrying data
pub const RPC_EXECUTION_REVERTED: i64 = 3;

/// JSON-RPC server error code used for insufficient funds and similar
pub const RPC_SERVER_ERROR: i64 = -32000;
