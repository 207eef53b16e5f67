use fieldsim_device::event::{Event, Severity};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Accept `0x`-prefixed hex or plain decimal register addresses/values.
pub fn parse_u16(input: &str) -> Result<u16, String> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid 16-bit value '{input}': {err}"))
}

/// Parse a `UNIT:ADDR=VALUE` register preseed, e.g. `1:0x2000=1`.
pub fn parse_set_spec(input: &str) -> Result<(u8, u16, u16), String> {
    let (unit, rest) = input
        .split_once(':')
        .ok_or_else(|| format!("expected UNIT:ADDR=VALUE, got '{input}'"))?;
    let (address, value) = rest
        .split_once('=')
        .ok_or_else(|| format!("expected UNIT:ADDR=VALUE, got '{input}'"))?;
    let unit: u8 = unit
        .trim()
        .parse()
        .map_err(|err| format!("invalid unit id '{unit}': {err}"))?;
    Ok((unit, parse_u16(address)?, parse_u16(value)?))
}

/// One-line terminal rendering of an operator event.
pub fn render_event(event: &Event) -> String {
    match event {
        Event::Log { severity, text } => {
            let lane = match severity {
                Severity::Info => "info",
                Severity::Warn => "warn",
                Severity::Err => " err",
                Severity::Rx => "  rx",
                Severity::Tx => "  tx",
            };
            format!("[{lane}] {text}")
        }
        other => format!(
            "[evnt] {}",
            serde_json::to_string(other).unwrap_or_else(|_| "<unserializable>".into())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_set_spec, parse_u16};

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_u16("0x3000").unwrap(), 0x3000);
        assert_eq!(parse_u16("0X0B15").unwrap(), 0x0B15);
        assert_eq!(parse_u16("5000").unwrap(), 5000);
        assert!(parse_u16("0x10000").is_err());
        assert!(parse_u16("banana").is_err());
    }

    #[test]
    fn parses_set_specs() {
        assert_eq!(parse_set_spec("1:0x2000=1").unwrap(), (1, 0x2000, 1));
        assert_eq!(parse_set_spec("110:774=0x0403").unwrap(), (110, 774, 0x0403));
        assert!(parse_set_spec("1:0x2000").is_err());
        assert!(parse_set_spec("0x2000=1").is_err());
    }
}
