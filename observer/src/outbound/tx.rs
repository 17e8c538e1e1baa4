//! Minimal segwit transaction model
//!
//! Only what the UTXO signer needs: P2WPKH outputs, BIP143 sighashes for
//! P2WPKH inputs, DER signatures and the wire serialization.

use k256::ecdsa::Signature;

use crate::hash::double_sha256;

pub const TX_VERSION: i32 = 1;
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
pub const SIGHASH_ALL: u8 = 0x01;

/// Reference to an output of a previous transaction. `txid` is in internal byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutPoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

impl OutPoint {
    /// Parses a txid as displayed by RPC (byte-reversed hex).
    pub fn from_display(txid: &str, vout: u32) -> Result<Self, String> {
        let bytes = hex::decode(txid).map_err(|e| format!("invalid txid {}: {}", txid, e))?;
        let mut hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("txid {} is not 32 bytes", txid))?;
        hash.reverse();
        Ok(Self { txid: hash, vout })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.txid);
        out.extend_from_slice(&self.vout.to_le_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_varint(out, self.script_pubkey.len() as u64);
        out.extend_from_slice(&self.script_pubkey);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// `OP_0 <20-byte program>`
pub fn p2wpkh_script(program: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.push(0x00);
    script.push(0x14);
    script.extend_from_slice(program);
    script
}

/// Extracts the program of a P2WPKH script.
pub fn witness_program(script: &[u8]) -> Option<[u8; 20]> {
    match script {
        [0x00, 0x14, program @ ..] if program.len() == 20 => program.try_into().ok(),
        _ => None,
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn add_input(&mut self, previous_output: OutPoint) {
        self.inputs.push(TxIn {
            previous_output,
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        });
    }

    pub fn add_output(&mut self, value: u64, script_pubkey: Vec<u8>) {
        self.outputs.push(TxOut { value, script_pubkey });
    }

    fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        write_varint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous_output.write(out);
            // empty scriptSig
            write_varint(out, 0);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(out);
        }
    }

    /// Serialization without witness data; the txid preimage.
    pub fn serialize_no_witness(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        self.write_body(&mut out);
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Full wire serialization, with the segwit marker when any input has a witness.
    pub fn serialize(&self) -> Vec<u8> {
        if !self.has_witness() {
            return self.serialize_no_witness();
        }
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&[0x00, 0x01]);
        self.write_body(&mut out);
        for input in &self.inputs {
            write_varint(&mut out, input.witness.len() as u64);
            for item in &input.witness {
                write_varint(&mut out, item.len() as u64);
                out.extend_from_slice(item);
            }
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    pub fn serialize_size(&self) -> usize {
        self.serialize().len()
    }

    /// Transaction id in internal byte order.
    pub fn txid(&self) -> [u8; 32] {
        double_sha256(&self.serialize_no_witness())
    }

    /// Transaction id as displayed by RPC.
    pub fn txid_hex(&self) -> String {
        let mut id = self.txid();
        id.reverse();
        hex::encode(id)
    }

    /// BIP143 SIGHASH_ALL digest of input `index` spending a P2WPKH output.
    ///
    /// # Arguments
    ///
    /// * `index` - Input being signed
    /// * `program` - Witness program of the spent output
    /// * `amount` - Value of the spent output in satoshis
    pub fn witness_sighash(&self, index: usize, program: &[u8; 20], amount: u64) -> Option<[u8; 32]> {
        let input = self.inputs.get(index)?;

        let mut prevouts = Vec::with_capacity(36 * self.inputs.len());
        let mut sequences = Vec::with_capacity(4 * self.inputs.len());
        for i in &self.inputs {
            i.previous_output.write(&mut prevouts);
            sequences.extend_from_slice(&i.sequence.to_le_bytes());
        }
        let mut outputs = Vec::new();
        for o in &self.outputs {
            o.write(&mut outputs);
        }

        let mut preimage = Vec::with_capacity(182);
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(&double_sha256(&prevouts));
        preimage.extend_from_slice(&double_sha256(&sequences));
        input.previous_output.write(&mut preimage);
        // scriptCode: OP_DUP OP_HASH160 <program> OP_EQUALVERIFY OP_CHECKSIG
        preimage.extend_from_slice(&[0x19, 0x76, 0xa9, 0x14]);
        preimage.extend_from_slice(program);
        preimage.extend_from_slice(&[0x88, 0xac]);
        preimage.extend_from_slice(&amount.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(&double_sha256(&outputs));
        preimage.extend_from_slice(&self.lock_time.to_le_bytes());
        preimage.extend_from_slice(&(SIGHASH_ALL as u32).to_le_bytes());

        Some(double_sha256(&preimage))
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

fn der_integer(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let trimmed = &bytes[start..];
    let mut out = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        out.push(0x00);
    }
    out.extend_from_slice(trimmed);
    out
}

/// DER encoding of a 65-byte `r || s || v` signature, low-S normalized.
pub fn der_signature(sig: &[u8; 65]) -> Result<Vec<u8>, k256::ecdsa::Error> {
    let mut signature = Signature::from_slice(&sig[..64])?;
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
    }
    let (r, s) = signature.split_bytes();
    let r = der_integer(&r);
    let s = der_integer(&s);

    let mut out = Vec::with_capacity(6 + r.len() + s.len());
    out.push(0x30);
    out.push((4 + r.len() + s.len()) as u8);
    out.push(0x02);
    out.push(r.len() as u8);
    out.extend_from_slice(&r);
    out.push(0x02);
    out.push(s.len() as u8);
    out.extend_from_slice(&s);
    Ok(out)
}
