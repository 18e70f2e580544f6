//! Solidity interfaces of every contract the synchronizer talks to
//!
//! The diamond's whitelist facets, the token probe, the Safe multisig and
//! the OpenZeppelin timelock.

#![allow(missing_docs)]

use alloy_sol_types::sol;

sol! {
    #![sol(extra_derives(Debug))]

    /// Granular whitelist facet of the diamond
    interface IWhitelistManager {
        function batchSetContractSelectorWhitelist(
            address[] calldata _contracts,
            bytes4[] calldata _selectors,
            bool _whitelisted
        ) external;
        function getAllContractSelectorPairs()
            external
            view
            returns (address[] memory contracts, bytes4[][] memory selectors);
        function getWhitelistedAddresses() external view returns (address[] memory);
        function getWhitelistedSelectorsForContract(address _contract)
            external
            view
            returns (bytes4[] memory);
    }

    /// Address-only dex manager facet found on older diamonds
    interface IDexManager {
        function batchAddDex(address[] calldata _dexs) external;
        function batchRemoveDex(address[] calldata _dexs) external;
        function approvedDexs() external view returns (address[] memory);
    }

    /// Read-only calls every fungible token answers
    interface IERC20Probe {
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
    }

    /// Safe multisig
    interface ISafe {
        function nonce() external view returns (uint256);
        function isOwner(address owner) external view returns (bool);
    }

    /// OpenZeppelin TimelockController
    interface ITimelockController {
        function getMinDelay() external view returns (uint256);
        function getTimestamp(bytes32 id) external view returns (uint256);
        function hashOperation(
            address target,
            uint256 value,
            bytes calldata data,
            bytes32 predecessor,
            bytes32 salt
        ) external pure returns (bytes32);
        function schedule(
            address target,
            uint256 value,
            bytes calldata data,
            bytes32 predecessor,
            bytes32 salt,
            uint256 delay
        ) external;
    }

    /// EIP-712 Safe transaction
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}
