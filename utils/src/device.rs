use anyhow::{anyhow, Context};
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    let Some(target) = device_name else {
        return host.default_input_device().ok_or_else(|| anyhow!("No default input device"));
    };
    host.input_devices()
        .context("failed to enumerate input devices")?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("No target device found: {target}"))
}

pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    let Some(target) = device_name else {
        return host.default_output_device().ok_or_else(|| anyhow!("No default output device"));
    };
    host.output_devices()
        .context("failed to enumerate output devices")?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("No target device found: {target}"))
}

fn describe(name: String, channels: u16, sample_rate: u32, default_name: Option<&str>) -> String {
    let mut d = format!(" * {}({}ch, {}hz)", name, channels, sample_rate);
    if default_name == Some(name.as_str()) {
        d.push_str(" [default]");
    }
    d
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_device = host.default_input_device().and_then(|d| d.name().ok());
    let mut device_names: Vec<String> = Vec::new();
    for in_device in host.input_devices().context("No input devices found")? {
        let Ok(d_name) = in_device.name() else { continue };
        let Ok(d_cfg) = in_device.default_input_config() else {
            tracing::debug!("skipping input without default config: {}", d_name);
            continue;
        };
        let default_name = default_device.as_deref();
        device_names.push(describe(d_name, d_cfg.channels(), d_cfg.sample_rate().0, default_name));
    }
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_device = host.default_output_device().and_then(|d| d.name().ok());
    let mut device_names: Vec<String> = Vec::new();
    for out_device in host.output_devices().context("No output devices found")? {
        let Ok(d_name) = out_device.name() else { continue };
        let Ok(d_cfg) = out_device.default_output_config() else {
            tracing::debug!("skipping output without default config: {}", d_name);
            continue;
        };
        let default_name = default_device.as_deref();
        device_names.push(describe(d_name, d_cfg.channels(), d_cfg.sample_rate().0, default_name));
    }
    Ok(device_names.join("\n"))
}
