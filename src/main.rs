use std::io;
use std::path::Path;

use anyhow::{Context, Error};
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;
use tracing_subscriber::EnvFilter;

use informe_tecnico::assemble::ReportAssembler;
use informe_tecnico::config::{create_output_directory, Settings};
use informe_tecnico::error::ReportError;
use informe_tecnico::form::ReportForm;
use informe_tecnico::model::ReportRecord;
use informe_tecnico::reference::ReferenceData;
use informe_tecnico::rules::RequiredFieldRules;
use informe_tecnico::template::Template;

const EXIT_MISSING_FIELDS: i32 = 2;

pub fn make_app() -> Command {
    Command::new("informe-tecnico")
        .about("Fills the technical service report template from a report form")
        .subcommand_required(true)
        .arg(
            Arg::new("template")
                .long("template")
                .global(true)
                .help("Template workbook (defaults to $INFORME_TEMPLATE_FILE)"),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .global(true)
                .help("Where generated reports go (defaults to $INFORME_OUTPUT_DIR or .)"),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .global(true)
                .help("Required-field rules file (defaults to $INFORME_RULES_FILE or built-in)"),
        )
        .subcommand(
            Command::new("reference")
                .about("Print reference data loaded from the template as CSV")
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .default_value("clients")
                        .value_parser(PossibleValuesParser::new([
                            "services",
                            "technicians",
                            "clients",
                            "parts",
                        ])),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("List the required fields a report form leaves empty")
                .arg(Arg::new("form").required(true))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print missing fields as a JSON array"),
                ),
        )
        .subcommand(
            Command::new("generate")
                .about("Validate a report form and write the filled workbook")
                .arg(Arg::new("form").required(true)),
        )
}

fn main() {
    // Load .env file if present (for local configuration)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let matches = make_app().get_matches();

    match run(&matches) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(matches: &ArgMatches) -> Result<i32, Error> {
    let settings = Settings::resolve(
        matches.get_one::<String>("template").map(String::as_str),
        matches.get_one::<String>("output-dir").map(String::as_str),
        matches.get_one::<String>("rules").map(String::as_str),
    )?;
    let template = Template::new(&settings.template)?;
    let reference = ReferenceData::load(&template)?;

    match matches.subcommand() {
        Some(("reference", sub_args)) => {
            let kind = sub_args
                .get_one::<String>("kind")
                .map(String::as_str)
                .unwrap_or("clients");
            write_reference_csv(&reference, kind)?;
            Ok(0)
        }
        Some(("validate", sub_args)) => {
            let rules = load_rules(&settings)?;
            handle_validate(sub_args, &reference, &rules)
        }
        Some(("generate", sub_args)) => {
            let rules = load_rules(&settings)?;
            handle_generate(sub_args, &settings, &template, &reference, &rules)
        }
        _ => Ok(0),
    }
}

fn load_rules(settings: &Settings) -> Result<RequiredFieldRules, Error> {
    let rules = match &settings.rules {
        Some(path) => RequiredFieldRules::load(path)?,
        None => RequiredFieldRules::builtin()?,
    };
    Ok(rules)
}

fn load_form(
    sub_args: &ArgMatches,
    reference: &ReferenceData,
) -> Result<ReportRecord, Error> {
    let form_path = Path::new(
        sub_args
            .get_one::<String>("form")
            .map(String::as_str)
            .unwrap_or_default(),
    );
    let base_dir = form_path.parent().unwrap_or_else(|| Path::new("."));
    let today = chrono::Local::now().date_naive();

    let record = ReportForm::load(form_path)?.into_record(reference, base_dir, today)?;
    Ok(record)
}

fn handle_validate(
    sub_args: &ArgMatches,
    reference: &ReferenceData,
    rules: &RequiredFieldRules,
) -> Result<i32, Error> {
    let record = load_form(sub_args, reference)?;
    let missing = rules.validate(&record, record.service_type);

    if sub_args.get_flag("json") {
        println!("{}", serde_json::to_string(&missing)?);
    } else if missing.is_empty() {
        println!("Todos los campos obligatorios para {} están completos", record.service_type);
    } else {
        print_missing(&record.service_type.to_string(), &missing);
    }

    Ok(if missing.is_empty() { 0 } else { EXIT_MISSING_FIELDS })
}

fn handle_generate(
    sub_args: &ArgMatches,
    settings: &Settings,
    template: &Template,
    reference: &ReferenceData,
    rules: &RequiredFieldRules,
) -> Result<i32, Error> {
    let record = load_form(sub_args, reference)?;

    let report = match ReportAssembler::new(template, rules).assemble(&record) {
        Ok(report) => report,
        Err(ReportError::Validation {
            service_type,
            missing,
        }) => {
            print_missing(&service_type, &missing);
            return Ok(EXIT_MISSING_FIELDS);
        }
        Err(e) => return Err(e.into()),
    };

    create_output_directory(&settings.output_dir)?;
    let output_path = settings.output_dir.join(&report.file_name);
    std::fs::write(&output_path, &report.bytes)
        .with_context(|| format!("Failed to write report '{}'", output_path.display()))?;
    info!("Report written to {}", output_path.display());

    if report.dropped_parts > 0 {
        eprintln!(
            "Advertencia: {} pieza(s) no caben en el informe y no fueron escritas",
            report.dropped_parts
        );
    }
    println!("{}", output_path.display());
    Ok(0)
}

fn print_missing(service_type: &str, missing: &[&str]) {
    println!(
        "Por favor, complete los siguientes campos obligatorios para {}:",
        service_type
    );
    for field in missing {
        println!("- {}", field);
    }
}

fn write_reference_csv(reference: &ReferenceData, kind: &str) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    match kind {
        "services" => {
            writer.write_record(["tipo"])?;
            for service in &reference.service_types {
                writer.write_record([service])?;
            }
        }
        "technicians" => {
            writer.write_record(["tecnico"])?;
            for technician in &reference.technicians {
                writer.write_record([technician])?;
            }
        }
        "clients" => {
            writer.write_record(["serie", "razon_social", "rut", "ubicacion", "modelo"])?;
            for (serial, client) in reference.clients.iter() {
                writer.write_record([
                    serial,
                    &client.company_name,
                    &client.tax_id,
                    &client.location,
                    &client.model,
                ])?;
            }
        }
        "parts" => {
            writer.write_record(["codigo", "nombre"])?;
            for (name, code) in reference.parts.iter() {
                writer.write_record([code, name])?;
            }
        }
        other => return Err(Error::msg(format!("Unknown reference table: {}", other))),
    }
    writer.flush()?;
    Ok(())
}
