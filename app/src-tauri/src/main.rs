use jozin_core::config::{IndexConfig, OutputConfig, OutputMode};
use jozin_core::IndexEntry;

#[tauri::command]
fn index_path(path: String) -> Result<IndexEntry, String> {
    let config = IndexConfig {
        root: path.into(),
        output: OutputConfig { mode: OutputMode::Stdout, file: None },
        ..IndexConfig::default()
    };
    jozin_core::index_path(&config, None, None)
        .map(|(entry, _status)| entry)
        .map_err(|e| e.to_string())
}

fn main() {
    tauri::Builder::default()
        .invoke_handler(tauri::generate_handler![index_path])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
