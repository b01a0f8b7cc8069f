use super::{json_pretty, EXIT_SUCCESS};
use quarry_store::{DirectoryLibrary, Library};
use std::path::Path;

pub fn run(library_root: &Path, id: Option<&str>, json: bool) -> Result<u8, String> {
    let library = DirectoryLibrary::new(library_root);
    let tools: Vec<(String, Vec<String>)> = match id {
        Some(id) => vec![(id.to_owned(), library.get_available_versions(id))],
        None => library
            .get_available_tools()
            .into_iter()
            .map(|id| {
                let versions = library.get_available_versions(&id);
                (id, versions)
            })
            .collect(),
    };

    if json {
        let entries: Vec<_> = tools
            .iter()
            .map(|(id, versions)| serde_json::json!({"id": id, "versions": versions}))
            .collect();
        println!("{}", json_pretty(&entries)?);
    } else if tools.iter().all(|(_, versions)| versions.is_empty()) {
        println!("no tools installed in {}", library_root.display());
    } else {
        println!("{:<24} VERSIONS", "TOOL");
        for (id, versions) in &tools {
            println!("{id:<24} {}", versions.join(", "));
        }
    }
    Ok(EXIT_SUCCESS)
}
