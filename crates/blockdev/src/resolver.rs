// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Device path resolution
//!
//! Network attached SCSI disks show up in several places once a session is
//! established: a stable `/dev/disk/by-path` link, a raw `/dev/sd*` node listed by
//! `lsscsi`, and, when dm-multipath claims the disk, a `/dev/mapper` device stacked
//! on top of it. [`Resolver`] finds each of these through the host utilities.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use crate::{Error, Executor, Logger};

/// Default delay between two existence probes
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

const BY_PATH_DIR: &str = "/dev/disk/by-path";
const MAPPER_DIR: &str = "/dev/mapper";
const MULTIPATH_CONFIRMATION: &str = "is a valid multipath device";

/// Computes the udev `by-path` link for an iSCSI LUN.
///
/// The result only depends on its inputs so it can be recomputed on every
/// attach and compared against what already exists on the host.
///
/// # Examples
///
/// ```
/// let path = blockdev::resolver::iscsi_by_path("10.0.0.1:3260", "iqn.test:disk1", 0);
/// assert_eq!(path.to_str(), Some("/dev/disk/by-path/ip-10.0.0.1:3260-iscsi-iqn.test:disk1lun-0"));
/// ```
pub fn iscsi_by_path(portal: &str, target_iqn: &str, lun: u32) -> PathBuf {
    PathBuf::from(BY_PATH_DIR).join(format!("ip-{portal}-iscsi-{target_iqn}lun-{lun}"))
}

/// Finds the device named on the last `lsscsi -t` line mentioning `target`
pub fn parse_lsscsi<'a>(output: &'a str, target: &str) -> Option<&'a str> {
    output
        .trim()
        .lines()
        .filter(|line| line.contains(target))
        .filter_map(|line| line.split_whitespace().last())
        .last()
}

/// Finds the device on the last `lsscsi -t` line for `target` whose
/// `[H:C:T:L]` address ends in `lun`
pub fn parse_lsscsi_lun<'a>(output: &'a str, target: &str, lun: u32) -> Option<&'a str> {
    output
        .trim()
        .lines()
        .filter(|line| line.contains(target) && scsi_lun(line) == Some(lun))
        .filter_map(|line| line.split_whitespace().last())
        .last()
}

fn scsi_lun(line: &str) -> Option<u32> {
    let address = line.split_whitespace().next()?;
    let address = address.strip_prefix('[')?.strip_suffix(']')?;
    address.rsplit(':').next()?.parse().ok()
}

/// Extracts the mapper name from `lsblk <dev> -n -o name -r` output.
///
/// The first line names the raw device itself, the second its holder.
pub fn parse_mapper_name(output: &str) -> Option<&str> {
    output.trim().lines().nth(1).map(str::trim).filter(|name| !name.is_empty())
}

/// Resolves device paths using host utilities
#[derive(Clone)]
pub struct Resolver {
    executor: Arc<dyn Executor>,
    log: Logger,
    poll_interval: Duration,
}

impl Resolver {
    /// Create a resolver that polls every [`POLL_INTERVAL`]
    pub fn new(executor: Arc<dyn Executor>, log: Logger) -> Self {
        Self {
            executor,
            log: log.with_target(module_path!()),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the delay between existence probes
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self { poll_interval, ..self }
    }

    /// Probes once whether `path` exists on the host using `stat`
    pub fn path_exists(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        match self.executor.run("stat", &[&*path]) {
            Ok(_) => true,
            Err(e) => {
                self.log.trace(format_args!("stat {path}: {e}"));
                false
            }
        }
    }

    /// Polls for `path` to appear.
    ///
    /// Performs at most `max_retries` probes with the poll interval between them.
    /// Zero retries never probes and reports the path as missing.
    pub fn wait_for_path_to_exist(&self, path: &Path, max_retries: u32) -> bool {
        for attempt in 1..=max_retries {
            if self.path_exists(path) {
                self.log.debug(format_args!("{} exists (attempt {attempt})", path.display()));
                return true;
            }
            if attempt < max_retries {
                thread::sleep(self.poll_interval);
            }
        }

        if max_retries > 0 {
            self.log.debug(format_args!(
                "{} did not appear after {max_retries} attempts",
                path.display()
            ));
        }
        false
    }

    /// Asks dm-multipath whether `device` belongs to a multipath map.
    ///
    /// A failing `multipath` run is reported as "not multipath".
    pub fn is_multipath(&self, device: &str) -> bool {
        let output = match self.executor.run("multipath", &["-c", device]) {
            Ok(output) => output,
            Err(e) => {
                self.log
                    .error(format_args!("multipath check failed, multipath not running? {e}"));
                return false;
            }
        };

        self.log.trace(format_args!("response from multipath cmd: {}", output.trim()));
        output.contains(MULTIPATH_CONFIRMATION)
    }

    /// Finds the raw SCSI block device (e.g. `/dev/sdb`) for `target`
    pub fn find_scsi_device(&self, target: &str) -> Result<String, Error> {
        let output = self.lsscsi()?;

        match parse_lsscsi(&output, target) {
            Some(device) => Ok(device.to_owned()),
            None => {
                self.log
                    .error(format_args!("unable to find the block device for {target}"));
                Err(Error::NotFound(target.to_owned()))
            }
        }
    }

    /// Finds the raw SCSI block device for logical unit `lun` of `target`
    pub fn find_scsi_lun(&self, target: &str, lun: u32) -> Result<String, Error> {
        let output = self.lsscsi()?;

        match parse_lsscsi_lun(&output, target, lun) {
            Some(device) => Ok(device.to_owned()),
            None => {
                self.log
                    .error(format_args!("unable to find the block device for {target} lun {lun}"));
                Err(Error::NotFound(format!("{target} lun {lun}")))
            }
        }
    }

    fn lsscsi(&self) -> Result<String, Error> {
        self.executor.run("lsscsi", &["-t"]).inspect_err(|e| {
            self.log.error(format_args!("unable to perform lsscsi -t: {e}"));
        })
    }

    /// Looks up the mapper device stacked on `device`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(path))` with the `/dev/mapper` path when `lsblk` lists a holder
    /// * `Ok(None)` when the listing has no holder line
    /// * `Err` when `lsblk` itself fails
    pub fn mapper_device(&self, device: &str) -> Result<Option<String>, Error> {
        let output = self
            .executor
            .run("lsblk", &[device, "-n", "-o", "name", "-r"])
            .inspect_err(|e| {
                self.log
                    .error(format_args!("unable to find mpath device due to lsblk error: {e}"));
            })?;

        match parse_mapper_name(&output) {
            Some(name) => {
                let mapper = format!("{MAPPER_DIR}/{name}");
                self.log.info(format_args!("parsed lsblk output for {device}: {mapper}"));
                Ok(Some(mapper))
            }
            None => {
                self.log
                    .warn(format_args!("unable to parse lsblk output ({:?})", output.trim()));
                Ok(None)
            }
        }
    }

    /// Maps `target` to the block device a caller should use.
    ///
    /// Multipath-backed disks resolve to their `/dev/mapper` device. If the
    /// mapper cannot be parsed the raw device is returned instead.
    pub fn get_blk_device(&self, target: &str) -> Result<String, Error> {
        let device = self.find_scsi_device(target)?;

        if !self.is_multipath(&device) {
            return Ok(device);
        }

        self.log.info(format_args!("multipath detected for {device}"));
        Ok(self.mapper_device(&device)?.unwrap_or(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CapturingLog, MockExecutor, Reply};
    use log::Level;
    use test_log::test;

    const LSSCSI: &str = "\
[0:0:0:0]    disk    ata:VBOX_HARDDISK_VB5a5b                /dev/sda
[2:0:0:0]    disk    iqn.test:disk1,t,0x1                    /dev/sdb
[3:0:0:0]    disk    iqn.test:disk2,t,0x1                    /dev/sdc
";

    fn resolver(mock: &Arc<MockExecutor>) -> (Resolver, Arc<CapturingLog>) {
        let sink = Arc::new(CapturingLog::default());
        let resolver = Resolver::new(mock.clone(), Logger::new(sink.clone())).with_poll_interval(Duration::ZERO);
        (resolver, sink)
    }

    #[test]
    fn test_by_path_is_deterministic() {
        let a = iscsi_by_path("10.0.0.1:3260", "iqn.test:disk1", 0);
        let b = iscsi_by_path("10.0.0.1:3260", "iqn.test:disk1", 0);
        assert_eq!(a, b);
        assert_eq!(
            a,
            PathBuf::from("/dev/disk/by-path/ip-10.0.0.1:3260-iscsi-iqn.test:disk1lun-0")
        );
        assert_eq!(
            iscsi_by_path("[fe80::1]:3260", "iqn.2001-04.com.example:storage", 12),
            PathBuf::from("/dev/disk/by-path/ip-[fe80::1]:3260-iscsi-iqn.2001-04.com.example:storagelun-12")
        );
    }

    #[test]
    fn test_zero_retries_never_probes() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("stat", Reply::ok());
        let (resolver, _) = resolver(&mock);

        assert!(!resolver.wait_for_path_to_exist(Path::new("/dev/sdb"), 0));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_wait_stops_at_first_success() {
        let mock = Arc::new(MockExecutor::new());
        mock.reply("stat", Reply::fail("No such file or directory"))
            .reply("stat", Reply::fail("No such file or directory"))
            .always("stat", Reply::ok());
        let (resolver, _) = resolver(&mock);

        assert!(resolver.wait_for_path_to_exist(Path::new("/dev/sdb"), 5));
        let probes = mock.calls_to("stat");
        assert_eq!(probes.len(), 3);
        assert_eq!(probes[0].args, vec!["/dev/sdb".to_owned()]);
    }

    #[test]
    fn test_wait_gives_up() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("stat", Reply::fail("No such file or directory"));
        let (resolver, _) = resolver(&mock);

        assert!(!resolver.wait_for_path_to_exist(Path::new("/dev/sdb"), 4));
        assert_eq!(mock.calls_to("stat").len(), 4);
    }

    #[test]
    fn test_multipath_check_failure_is_not_multipath() {
        let mock = Arc::new(MockExecutor::new());
        let (resolver, sink) = resolver(&mock);

        // multipath not installed
        assert!(!resolver.is_multipath("/dev/sdb"));
        assert!(sink.contains(Level::Error, "multipath check failed"));

        mock.reply("multipath", Reply::fail("/dev/sdb is not a valid multipath device path"));
        assert!(!resolver.is_multipath("/dev/sdb"));
    }

    #[test]
    fn test_multipath_confirmation() {
        let mock = Arc::new(MockExecutor::new());
        mock.reply("multipath", Reply::output("/dev/sdb is a valid multipath device path\n"))
            .reply("multipath", Reply::output("something else\n"));
        let (resolver, _) = resolver(&mock);

        assert!(resolver.is_multipath("/dev/sdb"));
        assert!(!resolver.is_multipath("/dev/sdb"));
        assert_eq!(mock.calls()[0].command_line(), "multipath -c /dev/sdb");
    }

    #[test]
    fn test_parse_lsscsi() {
        assert_eq!(parse_lsscsi(LSSCSI, "iqn.test:disk1"), Some("/dev/sdb"));
        assert_eq!(parse_lsscsi(LSSCSI, "iqn.test:disk2"), Some("/dev/sdc"));
        // last matching line wins
        assert_eq!(parse_lsscsi(LSSCSI, "iqn.test:disk"), Some("/dev/sdc"));
        assert_eq!(parse_lsscsi(LSSCSI, "iqn.test:disk9"), None);
        assert_eq!(parse_lsscsi("", "iqn.test:disk1"), None);
    }

    const LSSCSI_LUNS: &str = "\
[2:0:0:0]    disk    iqn.test:disk1,t,0x1                    /dev/sdb
[2:0:0:1]    disk    iqn.test:disk1,t,0x1                    /dev/sdc
[2:0:0:12]   disk    iqn.test:disk1,t,0x1                    /dev/sdd
";

    #[test]
    fn test_parse_lsscsi_lun() {
        assert_eq!(parse_lsscsi_lun(LSSCSI_LUNS, "iqn.test:disk1", 0), Some("/dev/sdb"));
        assert_eq!(parse_lsscsi_lun(LSSCSI_LUNS, "iqn.test:disk1", 1), Some("/dev/sdc"));
        assert_eq!(parse_lsscsi_lun(LSSCSI_LUNS, "iqn.test:disk1", 12), Some("/dev/sdd"));
        assert_eq!(parse_lsscsi_lun(LSSCSI_LUNS, "iqn.test:disk1", 2), None);
        assert_eq!(parse_lsscsi_lun(LSSCSI_LUNS, "iqn.test:disk2", 0), None);
        assert_eq!(parse_lsscsi_lun("garbage iqn.test:disk1 /dev/sdb", "iqn.test:disk1", 0), None);
    }

    #[test]
    fn test_find_scsi_lun() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("lsscsi", Reply::output(LSSCSI_LUNS));
        let (resolver, sink) = resolver(&mock);

        assert_eq!(resolver.find_scsi_lun("iqn.test:disk1", 0).unwrap(), "/dev/sdb");
        assert_eq!(resolver.find_scsi_lun("iqn.test:disk1", 1).unwrap(), "/dev/sdc");

        let err = resolver.find_scsi_lun("iqn.test:disk1", 3).unwrap_err();
        assert_eq!(err.to_string(), "unable to find lsscsi output for: iqn.test:disk1 lun 3");
        assert!(sink.contains(Level::Error, "iqn.test:disk1 lun 3"));
    }

    #[test]
    fn test_parse_mapper_name() {
        assert_eq!(parse_mapper_name("sdb\nmpatha\n"), Some("mpatha"));
        assert_eq!(parse_mapper_name("sdb\n"), None);
        assert_eq!(parse_mapper_name(""), None);
    }

    #[test]
    fn test_get_blk_device_not_found() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("lsscsi", Reply::output(LSSCSI));
        let (resolver, _) = resolver(&mock);

        let err = resolver.get_blk_device("iqn.test:missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(ref t) if t == "iqn.test:missing"));
        assert_eq!(err.to_string(), "unable to find lsscsi output for: iqn.test:missing");
        assert!(mock.calls_to("multipath").is_empty());
    }

    #[test]
    fn test_get_blk_device_raw() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("lsscsi", Reply::output(LSSCSI))
            .always("multipath", Reply::fail("not a valid multipath device"));
        let (resolver, _) = resolver(&mock);

        assert_eq!(resolver.get_blk_device("iqn.test:disk1").unwrap(), "/dev/sdb");
        assert!(mock.calls_to("lsblk").is_empty());
    }

    #[test]
    fn test_get_blk_device_multipath() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("lsscsi", Reply::output(LSSCSI))
            .always("multipath", Reply::output("/dev/sdb is a valid multipath device path"))
            .always("lsblk", Reply::output("sdb\nmpatha\n"));
        let (resolver, _) = resolver(&mock);

        assert_eq!(resolver.get_blk_device("iqn.test:disk1").unwrap(), "/dev/mapper/mpatha");
        assert_eq!(mock.calls_to("lsblk")[0].command_line(), "lsblk /dev/sdb -n -o name -r");
    }

    #[test]
    fn test_get_blk_device_degraded_mapper() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("lsscsi", Reply::output(LSSCSI))
            .always("multipath", Reply::output("/dev/sdb is a valid multipath device path"))
            .always("lsblk", Reply::output("sdb\n"));
        let (resolver, sink) = resolver(&mock);

        assert_eq!(resolver.get_blk_device("iqn.test:disk1").unwrap(), "/dev/sdb");
        assert!(sink.contains(Level::Warn, "unable to parse lsblk output"));
    }

    #[test]
    fn test_get_blk_device_lsblk_failure() {
        let mock = Arc::new(MockExecutor::new());
        mock.always("lsscsi", Reply::output(LSSCSI))
            .always("multipath", Reply::output("/dev/sdb is a valid multipath device path"))
            .always("lsblk", Reply::fail("lsblk: /dev/sdb: not a block device"));
        let (resolver, _) = resolver(&mock);

        let err = resolver.get_blk_device("iqn.test:disk1").unwrap_err();
        assert!(matches!(err, Error::Command { ref program, .. } if program == "lsblk"));
    }
}
