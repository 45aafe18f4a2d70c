//! PDF concatenation with plain pdfTeX.
//!
//! Every page of every input is re-shipped at its own natural size: a
//! `\loop` over `\pdflastximagepages` reloads each page as an image and
//! sets the output page dimensions from the resulting box.

use crate::config::ConversionConfig;
use crate::converters::verify_output;
use crate::error::TexImgError;
use crate::job::ConversionJob;
use crate::runner::{ProcessRunner, ToolInvocation};

pub(crate) async fn concat(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    files: &[String],
    output: &str,
) -> Result<(), TexImgError> {
    let script = job.temp_name(".tex")?;
    let src = concat_script(files);
    let script_path = job.path(&script);
    std::fs::write(&script_path, src).map_err(|e| TexImgError::io(&script_path, e))?;

    let runner = ProcessRunner::new(config);
    let inv = ToolInvocation::new(&config.tools.pdftex, job.working_dir())
        .args(["-no-shell-escape", "-interaction=nonstopmode"])
        .arg(&script)
        .hint("a TeX distribution (pdftex)")
        .stage("concatenating PDF files");
    runner.run_logged(&inv).await?;

    let produced = script_path.with_extension("pdf");
    let target = job.path(output);
    match std::fs::remove_file(&target) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TexImgError::io(&target, e)),
    }
    std::fs::rename(&produced, &target).map_err(|e| TexImgError::io(&produced, e))?;
    verify_output(job, &config.tools.pdftex, output)
}

fn concat_script(files: &[String]) -> String {
    let mut src = String::new();
    src.push_str("\\pdfoutput=1\\relax\n");
    src.push_str("\\pdfpagebox=0\\relax\n");
    src.push_str("\\newcount\\pagecount\\newcount\\tempcount\\newdimen\\tempdimen\n");
    src.push_str("\\pdfhorigin=0bp\\relax\n");
    src.push_str("\\pdfvorigin=0bp\\relax\n");
    for f in files {
        src.push_str(&format!("\\pdfximage{{{f}}}\\relax\n"));
        src.push_str("\\pagecount=\\pdflastximagepages\n");
        src.push_str("\\tempcount=0\\relax\n");
        src.push_str("\\loop\n");
        src.push_str("\\advance\\tempcount by 1\\relax\n");
        src.push_str(&format!("\\pdfximage page \\the\\tempcount{{{f}}}\\relax\n"));
        src.push_str("\\setbox0=\\hbox{\\pdfrefximage\\pdflastximage}\\relax\n");
        src.push_str("\\pdfpagewidth=\\wd0\\relax\n");
        src.push_str("\\pdfpageheight=\\ht0\\relax\n");
        src.push_str("\\shipout\\box0\\relax\n");
        src.push_str("\\ifnum\\tempcount<\\pagecount\\repeat\n");
    }
    src.push_str("\\bye\n");
    src
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_script_loops_over_every_input() {
        let src = concat_script(&["a-1.pdf".into(), "a-2.pdf".into()]);
        assert_eq!(src.matches("\\loop\n").count(), 2);
        assert!(src.contains("\\pdfximage{a-1.pdf}\\relax"));
        assert!(src.contains("\\pdfximage page \\the\\tempcount{a-2.pdf}\\relax"));
        assert!(src.contains("\\ifnum\\tempcount<\\pagecount\\repeat"));
    }
}
