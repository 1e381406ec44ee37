use std::collections::BTreeMap;
use std::fmt;

use crate::tokens::{vault_address, NftRegistry};
use crate::types::Address;

/// capability interface for item-level collateral constraints
///
/// Implementations answer one question: does the escrowed collateral
/// satisfy the offer's predicate bytes? The ledger never interprets the
/// bytes itself, and a malformed encoding is simply an unsatisfied
/// predicate.
pub trait PredicateVerifier {
    fn verify(
        &self,
        borrower: Address,
        lender: Address,
        collateral_address: Address,
        collateral_id: u128,
        data: &[u8],
        nfts: &NftRegistry,
    ) -> bool;
}

/// admin-curated set of trusted verifier implementations
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: BTreeMap<Address, Box<dyn PredicateVerifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: Address, verifier: Box<dyn PredicateVerifier>) {
        self.verifiers.insert(address, verifier);
    }

    pub fn get(&self, address: Address) -> Option<&dyn PredicateVerifier> {
        self.verifiers.get(&address).map(|b| b.as_ref())
    }
}

impl fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.verifiers.keys()).finish()
    }
}

fn read_address(data: &[u8]) -> Option<Address> {
    let bytes: [u8; 32] = data.get(..32)?.try_into().ok()?;
    Some(Address(bytes))
}

fn read_id(data: &[u8]) -> Option<u128> {
    let bytes: [u8; 16] = data.get(..16)?.try_into().ok()?;
    Some(u128::from_be_bytes(bytes))
}

/// collection-wide wildcard: any token of the named collection qualifies
///
/// Predicate data: 32-byte collection address.
pub struct CollectionWildcardVerifier;

impl CollectionWildcardVerifier {
    pub fn encode(collection: Address) -> Vec<u8> {
        collection.as_bytes().to_vec()
    }
}

impl PredicateVerifier for CollectionWildcardVerifier {
    fn verify(
        &self,
        _borrower: Address,
        _lender: Address,
        collateral_address: Address,
        _collateral_id: u128,
        data: &[u8],
        _nfts: &NftRegistry,
    ) -> bool {
        match read_address(data) {
            Some(collection) if data.len() == 32 => collateral_address == collection,
            _ => false,
        }
    }
}

/// exact-token constraint: the collateral must be one specific token
///
/// Predicate data: 32-byte collection address + 16-byte big-endian id.
pub struct SpecificTokenVerifier;

impl SpecificTokenVerifier {
    pub fn encode(collection: Address, id: u128) -> Vec<u8> {
        let mut data = collection.as_bytes().to_vec();
        data.extend_from_slice(&id.to_be_bytes());
        data
    }
}

impl PredicateVerifier for SpecificTokenVerifier {
    fn verify(
        &self,
        _borrower: Address,
        _lender: Address,
        collateral_address: Address,
        collateral_id: u128,
        data: &[u8],
        _nfts: &NftRegistry,
    ) -> bool {
        if data.len() != 48 {
            return false;
        }
        match (read_address(data), read_id(&data[32..])) {
            (Some(collection), Some(id)) => {
                collateral_address == collection && collateral_id == id
            }
            _ => false,
        }
    }
}

/// bundle-contents constraint: the collateral vault must hold every listed
/// item
///
/// Predicate data: 8-byte big-endian count, then per item a 32-byte
/// collection address + 16-byte big-endian id. Contents are checked
/// against the vault's derived holding address, so a mid-origination
/// withdrawal is caught when this runs after the callback.
pub struct BundleContentsVerifier;

impl BundleContentsVerifier {
    pub fn encode(items: &[(Address, u128)]) -> Vec<u8> {
        let mut data = (items.len() as u64).to_be_bytes().to_vec();
        for (collection, id) in items {
            data.extend_from_slice(collection.as_bytes());
            data.extend_from_slice(&id.to_be_bytes());
        }
        data
    }
}

impl PredicateVerifier for BundleContentsVerifier {
    fn verify(
        &self,
        _borrower: Address,
        _lender: Address,
        collateral_address: Address,
        collateral_id: u128,
        data: &[u8],
        nfts: &NftRegistry,
    ) -> bool {
        let count = match data.get(..8).and_then(|b| <[u8; 8]>::try_from(b).ok()) {
            Some(bytes) => u64::from_be_bytes(bytes) as usize,
            None => return false,
        };
        let body = &data[8..];
        if body.len() != count * 48 {
            return false;
        }

        let vault = vault_address(collateral_address, collateral_id);
        for chunk in body.chunks_exact(48) {
            let item = match (read_address(chunk), read_id(&chunk[32..])) {
                (Some(collection), Some(id)) => (collection, id),
                _ => return false,
            };
            if nfts.owner_of(item.0, item.1) != Some(vault) {
                return false;
            }
        }
        true
    }
}
