#[cfg(feature = "desktop")]
const COMMANDS: &[&str] = &[
    "upload_file",
    "cancel_upload",
    "get_upload_session",
    "list_uploads",
];

fn main() {
    #[cfg(feature = "desktop")]
    tauri_plugin::Builder::new(COMMANDS).build();
}
