use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device called `device_name`, or the host's default input.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        Some(target) => find_by_name(host.input_devices()?, target),
        None => host
            .default_input_device()
            .context("No default input device"),
    }
}

/// Finds the output device called `device_name`, or the host's default output.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        Some(target) => find_by_name(host.output_devices()?, target),
        None => host
            .default_output_device()
            .context("No default output device"),
    }
}

fn find_by_name(devices: impl Iterator<Item = Device>, target: &str) -> anyhow::Result<Device> {
    devices
        .into_iter()
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("No audio device named '{target}'"))
}

/// Lists input devices, one per line, marking the default.
pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.input_devices()? {
        let name = device.name()?;
        match device.default_input_config() {
            Ok(config) => lines.push(describe_device(
                &name,
                config.channels(),
                config.sample_rate().0,
                default_name.as_deref() == Some(name.as_str()),
            )),
            Err(e) => tracing::debug!("Skipping input device {name}: {e}"),
        }
    }
    Ok(lines.join("\n"))
}

/// Lists output devices, one per line, marking the default.
pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.output_devices()? {
        let name = device.name()?;
        match device.default_output_config() {
            Ok(config) => lines.push(describe_device(
                &name,
                config.channels(),
                config.sample_rate().0,
                default_name.as_deref() == Some(name.as_str()),
            )),
            Err(e) => tracing::debug!("Skipping output device {name}: {e}"),
        }
    }
    Ok(lines.join("\n"))
}

fn describe_device(name: &str, channels: u16, sample_rate: u32, is_default: bool) -> String {
    let mut line = format!(" * {name}({channels}ch, {sample_rate}hz)");
    if is_default {
        line.push_str(" [default]");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lines_mark_the_default() {
        assert_eq!(
            describe_device("Built-in Microphone", 1, 48000, true),
            " * Built-in Microphone(1ch, 48000hz) [default]"
        );
        assert_eq!(
            describe_device("USB Headset", 2, 44100, false),
            " * USB Headset(2ch, 44100hz)"
        );
    }
}
