use super::*;
use crate::domain::{
    has_firmware_extension, DeviceTarget, FlashAction, FlashRequest, Fuse, MemoryOperation,
};

fn request(action: FlashAction) -> FlashRequest {
    FlashRequest {
        target: DeviceTarget::default(),
        options: Default::default(),
        action,
    }
}

fn field<'a>(fields: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.as_str())
}

#[test]
fn parses_operation_complete_frame() {
    let raw = r#"{"type":"operation_complete","payload":{"success":true,"message":"done"}}"#;
    let event: PushEvent = serde_json::from_str(raw).expect("frame");
    assert_eq!(
        event,
        PushEvent::OperationComplete {
            success: true,
            message: Some("done".into()),
        }
    );
}

#[test]
fn parses_status_update_with_naive_start_time() {
    let raw = r#"{"type":"status_update","payload":{"is_running":true,"start_time":"2024-05-01T10:20:30.123456","operation_type":"upload"}}"#;
    let event: PushEvent = serde_json::from_str(raw).expect("frame");
    match event {
        PushEvent::StatusUpdate {
            is_running,
            start_time,
            operation_type,
        } => {
            assert!(is_running);
            assert!(start_time.is_some());
            assert_eq!(operation_type.as_deref(), Some("upload"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn status_response_tolerates_null_fields() {
    let raw = r#"{"is_running":false,"start_time":null,"operation_type":null,"queue_size":0}"#;
    let status: StatusResponse = serde_json::from_str(raw).expect("status");
    assert!(!status.is_running);
    assert!(status.start_time.is_none());
    assert_eq!(status.queue_size, Some(0));
}

#[test]
fn request_status_message_is_a_bare_tag() {
    let encoded = serde_json::to_value(ClientMessage::RequestStatus).expect("encode");
    assert_eq!(encoded, serde_json::json!({ "type": "request_status" }));
}

#[test]
fn erase_request_sets_operation_only_fields() {
    let fields = request(FlashAction::EraseChip).form_fields();
    assert_eq!(field(&fields, "port"), Some("/dev/ttyS7"));
    assert_eq!(field(&fields, "baud"), Some("115200"));
    assert_eq!(field(&fields, "operation_only"), Some("true"));
    assert_eq!(field(&fields, "erase_chip"), Some("true"));
    assert_eq!(field(&fields, "verbose"), None);
}

#[test]
fn fuse_read_request_joins_memory_operations() {
    let operations = Fuse::ALL.into_iter().map(MemoryOperation::read_fuse).collect();
    let fields = request(FlashAction::Memory(operations)).form_fields();
    assert_eq!(
        field(&fields, "memory_operations"),
        Some("lfuse:r:-:h,hfuse:r:-:h,efuse:r:-:h")
    );
}

#[test]
fn file_upload_carries_bytes_in_a_separate_part() {
    let upload = request(FlashAction::UploadFile {
        file_name: "blink.hex".into(),
        bytes: b":00000001FF".to_vec(),
    });
    let fields = upload.form_fields();
    assert_eq!(field(&fields, "hex_url"), None);
    assert_eq!(field(&fields, "operation_only"), None);
    let (name, bytes) = upload.file_part().expect("file part");
    assert_eq!(name, "blink.hex");
    assert_eq!(bytes, b":00000001FF");
}

#[test]
fn fuse_write_directive_uses_immediate_mode() {
    assert_eq!(
        MemoryOperation::write_fuse(Fuse::High, 0xde).to_string(),
        "hfuse:w:0xDE:m"
    );
    assert_eq!(Fuse::from_memory_name("EFUSE"), Some(Fuse::Extended));
}

#[test]
fn firmware_extension_check_is_case_insensitive() {
    assert!(has_firmware_extension("Blink.HEX"));
    assert!(has_firmware_extension("image.bin"));
    assert!(!has_firmware_extension("notes.txt"));
}
