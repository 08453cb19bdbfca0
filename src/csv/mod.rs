use crate::core::{Framework, MappedFinding};

const LINE_END: &str = "\r\n";

pub fn headers(framework: &Framework) -> [String; 8] {
    [
        "Title".to_string(),
        "Severity".to_string(),
        "Finding Type".to_string(),
        format!("{} Controls", framework.name),
        "Resource ID".to_string(),
        "Account ID".to_string(),
        "Region".to_string(),
        "Description".to_string(),
    ]
}

pub fn render_csv(framework: &Framework, mapped: &[MappedFinding]) -> String {
    let mut out = String::new();
    write_row(&mut out, headers(framework).iter().map(String::as_str));
    for m in mapped {
        let f = &m.finding;
        let types = f.types.join(", ");
        let controls = m.controls_label();
        write_row(
            &mut out,
            [
                f.title.as_str(),
                f.severity_label.as_str(),
                types.as_str(),
                controls.as_str(),
                f.resource_id(),
                f.account_id.as_str(),
                f.region.as_str(),
                f.description.as_str(),
            ],
        );
    }
    out
}

fn write_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push_str(LINE_END);
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}
