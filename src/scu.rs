//
// scu.rs
// dicom-deid
//
// DICOM network transfer: C-STORE of anonymized files to a remote AE, and C-ECHO to check
// the destination before a long run.
//
// dicom-deid contributors - October 2026

use std::fmt::Display;
use std::fs;
use std::path::Path;

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::encoding::{TransferSyntax, TransferSyntaxIndex};
use dicom::object::{open_file, InMemDicomObject};
use dicom::transfer_syntax::entries::{EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom_ul::association::client::{ClientAssociation, ClientAssociationOptions};
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu, PresentationContextResultReason};
use tracing::{debug, info};

use crate::dicom_access::ElementAccess;
use crate::transfer::{Transfer, TransferError};

const VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";
const DEFAULT_CALLING_AE: &str = "DICOM-DEID";
// PDV item header: 4 length bytes, presentation context id, message control header.
const PDV_HEADER_LEN: usize = 6;
const DEFAULT_PDV_DATA_LEN: usize = 16_378;

/// Sends each artifact to a Storage SCP with C-STORE.
#[derive(Debug, Clone)]
pub struct StoreScuTransfer {
    addr: String,
    calling_ae: String,
}

impl StoreScuTransfer {
    /// `addr` is `host:port` or `AE@host:port` to set the called AE title.
    pub fn new(addr: impl Into<String>, calling_ae: Option<String>) -> Self {
        Self {
            addr: addr.into(),
            calling_ae: calling_ae.unwrap_or_else(|| DEFAULT_CALLING_AE.to_string()),
        }
    }

    fn association_error(&self, context: &str, e: impl Display) -> TransferError {
        TransferError::Association {
            addr: self.addr.clone(),
            message: format!("{context}: {e}"),
        }
    }

    fn store(&self, artifact: &Path) -> Result<(), TransferError> {
        let obj = open_file(artifact)
            .map_err(|e| self.association_error("failed to open anonymized file", e))?;

        let sop_class = obj
            .sop_class_uid()
            .ok_or_else(|| self.association_error("cannot store", "missing SOP Class UID"))?;
        let sop_instance = obj
            .sop_instance_uid()
            .ok_or_else(|| self.association_error("cannot store", "missing SOP Instance UID"))?;
        let file_ts = obj
            .transfer_syntax()
            .unwrap_or_else(|| EXPLICIT_VR_LITTLE_ENDIAN.uid().to_string());

        // Offer the file's own transfer syntax first so compressed data need not be re-encoded.
        let mut transfer_syntaxes = vec![file_ts];
        for uid in [EXPLICIT_VR_LITTLE_ENDIAN.uid(), IMPLICIT_VR_LITTLE_ENDIAN.uid()] {
            if !transfer_syntaxes.iter().any(|ts| ts == uid) {
                transfer_syntaxes.push(uid.to_string());
            }
        }
        let mut association = self.connect(
            ClientAssociationOptions::new()
                .with_presentation_context(sop_class.clone(), transfer_syntaxes),
        )?;

        let pc = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.reason == PresentationContextResultReason::Acceptance)
            .cloned()
            .ok_or_else(|| {
                self.association_error("C-STORE", "no accepted presentation context for SOP Class")
            })?;

        // Construct C-STORE-RQ
        let mut cmd = InMemDicomObject::new_empty();
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0002),
            VR::UI,
            PrimitiveValue::from(sop_class),
        )); // Affected SOP Class UID
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0100),
            VR::US,
            PrimitiveValue::from(0x0001_u16),
        )); // Command Field: C-STORE-RQ
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0110),
            VR::US,
            PrimitiveValue::from(1_u16),
        )); // Message ID
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0700),
            VR::US,
            PrimitiveValue::from(0x0000_u16),
        )); // Priority: medium
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0800),
            VR::US,
            PrimitiveValue::from(0x0000_u16),
        )); // Command Data Set Type: data set present
        cmd.put(DataElement::new(
            Tag(0x0000, 0x1000),
            VR::UI,
            PrimitiveValue::from(sop_instance),
        )); // Affected SOP Instance UID

        let ts_ivrle = implicit_vr_le().map_err(|e| self.association_error("C-STORE", e))?;
        let mut command_bytes = Vec::new();
        cmd.write_dataset_with_ts(&mut command_bytes, ts_ivrle)
            .map_err(|e| self.association_error("failed to encode command set", e))?;

        let ts_negotiated = TransferSyntaxRegistry
            .get(pc.transfer_syntax.trim_end_matches('\0'))
            .ok_or_else(|| {
                self.association_error(
                    "C-STORE",
                    format!("negotiated transfer syntax {} not supported", pc.transfer_syntax),
                )
            })?;
        let mut data_bytes = Vec::new();
        obj.write_dataset_with_ts(&mut data_bytes, ts_negotiated)
            .map_err(|e| self.association_error("failed to encode data set", e))?;

        association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc.id,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: command_bytes,
                }],
            })
            .map_err(|e| self.association_error("failed to send C-STORE-RQ", e))?;
        self.send_data(&mut association, pc.id, data_bytes)?;

        let response = association
            .receive()
            .map_err(|e| self.association_error("failed to receive C-STORE-RSP", e))?;
        let status = response_status(&response, ts_ivrle)
            .map_err(|e| self.association_error("invalid C-STORE-RSP", e))?;
        let _ = association.release();

        debug!(status = %format!("{status:#06X}"), artifact = %artifact.display(), "C-STORE response");
        match status {
            0x0000 | 0xB000..=0xBFFF => Ok(()),
            status => Err(TransferError::Rejected { status }),
        }
    }

    /// Splits the data set into PDVs that fit the acceptor's maximum PDU length.
    fn send_data(
        &self,
        association: &mut ClientAssociation,
        pc_id: u8,
        data: Vec<u8>,
    ) -> Result<(), TransferError> {
        let max_pdu = association.acceptor_max_pdu_length() as usize;
        let chunk_len = if max_pdu == 0 {
            DEFAULT_PDV_DATA_LEN
        } else {
            max_pdu.saturating_sub(PDV_HEADER_LEN).max(1)
        };

        let mut chunks: Vec<&[u8]> = data.chunks(chunk_len).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            association
                .send(&Pdu::PData {
                    data: vec![PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Data,
                        is_last: index == last,
                        data: chunk.to_vec(),
                    }],
                })
                .map_err(|e| self.association_error("failed to send data set", e))?;
        }
        Ok(())
    }

    fn connect(&self, options: ClientAssociationOptions<'_>) -> Result<ClientAssociation, TransferError> {
        let options = options.calling_ae_title(self.calling_ae.clone());
        let established = if self.addr.contains('@') {
            options.establish_with(&self.addr)
        } else {
            options.establish(self.addr.as_str())
        };
        established.map_err(|e| self.association_error("failed to establish association", e))
    }
}

impl Transfer for StoreScuTransfer {
    fn send(&self, artifact: &Path) -> Result<(), TransferError> {
        self.store(artifact)?;
        fs::remove_file(artifact)
            .map_err(|e| TransferError::io(format!("removing {}", artifact.display()), e))
    }

    fn destination(&self) -> String {
        self.addr.clone()
    }
}

/// Perform a DICOM C-ECHO request against the given AE and return the response status.
pub fn echo(addr: &str, calling_ae: Option<String>) -> Result<u16, TransferError> {
    info!(addr, "sending C-ECHO");
    let scu = StoreScuTransfer::new(addr, calling_ae);

    let mut association =
        scu.connect(ClientAssociationOptions::new().with_abstract_syntax(VERIFICATION_SOP_CLASS))?;

    let pc_id = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.reason == PresentationContextResultReason::Acceptance)
        .map(|pc| pc.id)
        .ok_or_else(|| scu.association_error("C-ECHO", "no accepted presentation context for Verification"))?;

    // Command set is a tiny DICOM dataset encoded with Implicit VR Little Endian.
    let mut cmd = InMemDicomObject::new_empty();
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0002),
        VR::UI,
        PrimitiveValue::from(VERIFICATION_SOP_CLASS),
    ));
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0100),
        VR::US,
        PrimitiveValue::from(0x0030_u16),
    ));
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0110),
        VR::US,
        PrimitiveValue::from(1_u16),
    ));
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0800),
        VR::US,
        PrimitiveValue::from(0x0101_u16),
    ));

    let ts = implicit_vr_le().map_err(|e| scu.association_error("C-ECHO", e))?;
    let mut command_bytes = Vec::new();
    cmd.write_dataset_with_ts(&mut command_bytes, ts)
        .map_err(|e| scu.association_error("failed to encode command set", e))?;

    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: pc_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: command_bytes,
            }],
        })
        .map_err(|e| scu.association_error("failed to send C-ECHO-RQ", e))?;

    let response = association
        .receive()
        .map_err(|e| scu.association_error("failed to receive C-ECHO-RSP", e))?;
    let status = response_status(&response, ts)
        .map_err(|e| scu.association_error("invalid C-ECHO-RSP", e))?;
    let _ = association.release();

    info!(addr, status = %format!("{status:#06X}"), "C-ECHO response");
    Ok(status)
}

fn implicit_vr_le() -> Result<&'static TransferSyntax, String> {
    TransferSyntaxRegistry
        .get(IMPLICIT_VR_LITTLE_ENDIAN.uid())
        .ok_or_else(|| "Implicit VR Little Endian transfer syntax not found".to_string())
}

/// Extracts the Status (0000,0900) of a DIMSE response command.
fn response_status(pdu: &Pdu, ts: &TransferSyntax) -> Result<u16, String> {
    let Pdu::PData { data } = pdu else {
        return Err(format!("expected P-DATA-TF, received {pdu:?}"));
    };
    let command = data
        .iter()
        .find(|pdv| pdv.value_type == PDataValueType::Command)
        .ok_or_else(|| "response carries no command PDV".to_string())?;

    let obj = InMemDicomObject::read_dataset_with_ts(&command.data[..], ts)
        .map_err(|e| format!("failed to decode command set: {e}"))?;
    obj.element(Tag(0x0000, 0x0900))
        .map_err(|e| format!("missing status: {e}"))?
        .to_int::<u16>()
        .map_err(|e| format!("bad status: {e}"))
}
