//! Contract-creation transactions (EIP-155 legacy envelope).

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    rlp::{EMPTY_STRING_CODE, Encodable, Header},
};
use anyhow::Context;

use crate::credentials::Signer;

/// An unsigned transaction with no recipient: the input is creation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub value: U256,
    pub input: Bytes,
}

/// A signed, RLP-encoded transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: B256,
}

impl CreateTransaction {
    fn fields_len(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + 1
            + self.value.length()
            + self.input.length()
    }

    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        // Empty `to`.
        out.push(EMPTY_STRING_CODE);
        self.value.encode(out);
        self.input.encode(out);
    }

    /// Keccak hash of `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`.
    pub fn signing_hash(&self) -> B256 {
        let payload_length = self.fields_len() + self.chain_id.length() + 2;
        let mut buf = Vec::with_capacity(payload_length + 9);

        Header {
            list: true,
            payload_length,
        }
        .encode(&mut buf);
        self.encode_fields(&mut buf);
        self.chain_id.encode(&mut buf);
        0u8.encode(&mut buf);
        0u8.encode(&mut buf);

        keccak256(&buf)
    }

    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, v, r, s])`.
    pub fn encode_signed(&self, v: u64, r: U256, s: U256) -> Bytes {
        let payload_length = self.fields_len() + v.length() + r.length() + s.length();
        let mut buf = Vec::with_capacity(payload_length + 9);

        Header {
            list: true,
            payload_length,
        }
        .encode(&mut buf);
        self.encode_fields(&mut buf);
        v.encode(&mut buf);
        r.encode(&mut buf);
        s.encode(&mut buf);

        buf.into()
    }

    /// Sign with `signer`.
    pub fn sign(&self, signer: &Signer) -> anyhow::Result<SignedTransaction> {
        let (signature, recovery_id) = signer
            .sign_hash(&self.signing_hash())
            .context("Failed to sign deployment transaction")?;

        let v = u64::from(recovery_id.to_byte()) + self.chain_id * 2 + 35;
        let (r, s) = signature.split_bytes();
        let raw = self.encode_signed(v, U256::from_be_slice(&r), U256::from_be_slice(&s));
        let hash = keccak256(&raw);

        Ok(SignedTransaction { raw, hash })
    }
}

/// Address of the contract created by `sender` at `nonce`.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    sender.create(nonce)
}
