//! Devices command - list what cpal can see

use anyhow::Result;

/// Execute the devices command
pub fn execute() -> Result<()> {
    println!("=== Output devices ===");
    for name in fathom_audio::output_device_names()? {
        println!("  {name}");
    }
    println!("=== Input devices ===");
    for name in fathom_audio::input_device_names()? {
        println!("  {name}");
    }
    Ok(())
}
