use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Reads class labels, one per line, in model index order. Blank lines and
/// surrounding whitespace are ignored.
pub fn load_class_labels(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    parse_class_labels(io::BufReader::new(file))
}

fn parse_class_labels<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();
        if !label.is_empty() {
            labels.push(label.to_string());
        }
    }

    if labels.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "labels file contains no labels",
        ));
    }

    Ok(labels)
}
