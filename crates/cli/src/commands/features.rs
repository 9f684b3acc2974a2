//! features command - Show what each backend supports

use clap::Args;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use xfer_core::{CapabilityRegistry, FeatureRow};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Print the backend feature matrix
#[derive(Args, Debug)]
pub struct FeaturesArgs {
    /// Render as a Markdown table (ignored with --json)
    #[arg(long)]
    pub markdown: bool,
}

/// Execute the features command
pub async fn execute(args: FeaturesArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let registry = CapabilityRegistry::builtin();

    if formatter.is_json() {
        formatter.json(&registry.feature_matrix());
    } else if args.markdown {
        formatter.println(&registry.render_markdown());
    } else {
        formatter.println(&render_table(&registry.feature_matrix(), &formatter).to_string());
    }

    ExitCode::Success
}

fn render_table(rows: &[FeatureRow], formatter: &Formatter) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec![formatter.style_label("feature")];
    header.extend(rows.iter().map(|row| formatter.style_label(row.backend.as_str())));
    table.set_header(header);

    let Some(first) = rows.first() else {
        return table;
    };
    for (i, (feature, _)) in first.features.iter().enumerate() {
        let mut line = vec![feature.clone()];
        line.extend(rows.iter().map(|row| {
            let supported = row.features.get(i).is_some_and(|(_, s)| *s);
            let mark = if supported { "yes" } else { "no" };
            mark.to_string()
        }));
        table.add_row(line);
    }

    let mut modes = vec!["--if-exists".to_string()];
    modes.extend(rows.iter().map(|row| row.if_exists.join(", ")));
    table.add_row(modes);

    table
}
