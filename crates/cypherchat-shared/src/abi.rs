//! Bindings for the deployed chat contract.
//!
//! Exactly one ABI version is targeted: plain-text messages, no geo-lock,
//! burn-on-read or encrypted payload fields.

use alloy_sol_types::sol;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct Message {
        address sender;
        address receiver;
        string content;
        uint256 timestamp;
    }

    #[derive(Debug, PartialEq, Eq)]
    function registerUser(string name) external;

    #[derive(Debug, PartialEq, Eq)]
    function sendMessage(address to, string content) external;

    #[derive(Debug, PartialEq, Eq)]
    function getMessages(address user1, address user2) external view returns (Message[] memory);

    #[derive(Debug, PartialEq, Eq)]
    function users(address) external view returns (string name, bool exists);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use alloy_sol_types::SolCall;

    #[test]
    fn test_selectors_match_signatures() {
        assert_eq!(registerUserCall::SIGNATURE, "registerUser(string)");
        assert_eq!(sendMessageCall::SIGNATURE, "sendMessage(address,string)");
        assert_eq!(getMessagesCall::SIGNATURE, "getMessages(address,address)");
        assert_eq!(usersCall::SIGNATURE, "users(address)");
    }

    #[test]
    fn test_users_call_layout() {
        let call = usersCall { _0: Address::repeat_byte(0xbb) };
        let data = call.abi_encode();
        assert_eq!(&data[..4], &usersCall::SELECTOR);
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[4 + 12..], Address::repeat_byte(0xbb).as_slice());
    }
}
