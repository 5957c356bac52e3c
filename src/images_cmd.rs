//! CLI command handler for `images`.

use std::io::Write;

use crate::ProvisionResult;
use crate::core::ImageCatalog;

pub fn run(catalog: &ImageCatalog) -> ProvisionResult<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_catalog(&mut out, catalog)
}

pub fn write_catalog<W: Write>(out: &mut W, catalog: &ImageCatalog) -> ProvisionResult<()> {
    let width = catalog.iter().map(|(os, _)| os.len()).max().unwrap_or(0);
    for (os, image) in catalog.iter() {
        writeln!(out, "{os:<width$}  {image}")?;
    }
    Ok(())
}
