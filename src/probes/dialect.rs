//! Per-platform `ping` dialects.
//!
//! Each row of [`DIALECTS`] maps the abstract [`ProbeOptions`] onto concrete
//! flags and carries the patterns for that tool's output. Supporting another
//! platform means adding a row.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ProbeOptions, ResolvedTarget};

/// Compiled output patterns for one dialect.
///
/// Capture groups are named: `seq`, `ttl`, `time` and `detail` for per-packet
/// lines, `sent`, `recv`, `loss`, `min`, `avg` and `max` for the summary.
#[derive(Debug)]
pub struct Patterns {
    pub reply: Regex,
    pub unreachable: Regex,
    pub timeout: Regex,
    pub failure: Regex,
    pub transmitted: Regex,
    pub rtt: Regex,
}

impl Patterns {
    fn compile(src: [&str; 6]) -> Self {
        let re = |s: &str| Regex::new(s).expect("dialect pattern must compile");
        Self {
            reply: re(src[0]),
            unreachable: re(src[1]),
            timeout: re(src[2]),
            failure: re(src[3]),
            transmitted: re(src[4]),
            rtt: re(src[5]),
        }
    }
}

const UNIX_TRANSMITTED: &str =
    r"(?P<sent>\d+) packets transmitted, (?P<recv>\d+) (?:packets )?received.*?(?P<loss>[\d.]+)% packet loss";
const UNIX_RTT: &str =
    r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = (?P<min>[\d.]+)/(?P<avg>[\d.]+)/(?P<max>[\d.]+)";

const UNIX_UNREACHABLE: &str = concat!(
    r"(?i)(?:destination\s+(?:\w+\s+)?unreachable|time(?: to live)? exceeded",
    r"|frag(?:mentation)? needed)",
);

static LINUX_PATTERNS: Lazy<Patterns> = Lazy::new(|| {
    Patterns::compile([
        r"icmp_seq=(?P<seq>\d+)\s+ttl=(?P<ttl>\d+)\s+time[=<](?P<time>[\d.]+)",
        concat!(
            r"(?i)icmp_seq=(?P<seq>\d+)\s+",
            r"(?:destination\s+(?:\w+\s+)?unreachable|time(?: to live)? exceeded",
            r"|packet filtered|frag needed)",
        ),
        r"no answer yet for icmp_seq=(?P<seq>\d+)",
        r"^ping: (?P<detail>.+)$",
        UNIX_TRANSMITTED,
        UNIX_RTT,
    ])
});

static BSD_PATTERNS: Lazy<Patterns> = Lazy::new(|| {
    Patterns::compile([
        r"icmp_seq=(?P<seq>\d+)\s+ttl=(?P<ttl>\d+)\s+time=(?P<time>[\d.]+)",
        UNIX_UNREACHABLE,
        r"Request timeout for icmp_seq[= ]?(?P<seq>\d+)",
        r"^ping: (?P<detail>.+)$",
        UNIX_TRANSMITTED,
        UNIX_RTT,
    ])
});

static BSD6_PATTERNS: Lazy<Patterns> = Lazy::new(|| {
    Patterns::compile([
        r"icmp_seq=(?P<seq>\d+)\s+hlim=(?P<ttl>\d+)\s+time=(?P<time>[\d.]+)",
        UNIX_UNREACHABLE,
        r"Request timeout for icmp_seq[= ]?(?P<seq>\d+)",
        r"^ping6: (?P<detail>.+)$",
        UNIX_TRANSMITTED,
        UNIX_RTT,
    ])
});

static WINDOWS_PATTERNS: Lazy<Patterns> = Lazy::new(|| {
    Patterns::compile([
        r"Reply from \S+: (?:bytes=\d+ )?time[=<](?P<time>[\d.]+)\s?ms(?:\s+TTL=(?P<ttl>\d+))?",
        r"(?i)(?:destination (?:host|net|network|port) unreachable|TTL expired in transit)",
        r"^Request timed out",
        r"(?i)^(?P<detail>(?:PING: )?transmit failed.*|General failure.*|Ping request could not find host.*)$",
        r"Sent = (?P<sent>\d+), Received = (?P<recv>\d+), Lost = \d+ \((?P<loss>[\d.]+)% loss\)",
        r"Minimum = (?P<min>[\d.]+)ms, Maximum = (?P<max>[\d.]+)ms, Average = (?P<avg>[\d.]+)ms",
    ])
});

/// Flag set and output grammar of one platform's `ping`.
pub struct Dialect {
    pub name: &'static str,
    /// Values of `std::env::consts::OS` this row applies to.
    pub os: &'static [&'static str],
    /// `None` serves both families.
    pub ipv6: Option<bool>,
    pub program: &'static str,
    pub ipv4_flag: Option<&'static str>,
    pub ipv6_flag: Option<&'static str>,
    pub count_flag: &'static str,
    pub size_flag: &'static str,
    pub interval_flag: Option<&'static str>,
    pub ttl_flag: &'static str,
    pub no_fragment: &'static [&'static str],
    /// Always passed, before the options.
    pub fixed_args: &'static [&'static str],
    pub patterns: &'static Lazy<Patterns>,
}

pub static DIALECTS: [Dialect; 4] = [
    Dialect {
        name: "linux",
        os: &["linux", "android"],
        ipv6: None,
        program: "ping",
        ipv4_flag: Some("-4"),
        ipv6_flag: Some("-6"),
        count_flag: "-c",
        size_flag: "-s",
        interval_flag: Some("-i"),
        ttl_flag: "-t",
        no_fragment: &["-M", "do"],
        fixed_args: &["-n", "-O"],
        patterns: &LINUX_PATTERNS,
    },
    Dialect {
        name: "bsd",
        os: &["macos", "ios", "freebsd", "openbsd", "netbsd", "dragonfly"],
        ipv6: Some(false),
        program: "ping",
        ipv4_flag: None,
        ipv6_flag: None,
        count_flag: "-c",
        size_flag: "-s",
        interval_flag: Some("-i"),
        ttl_flag: "-m",
        no_fragment: &["-D"],
        fixed_args: &["-n"],
        patterns: &BSD_PATTERNS,
    },
    Dialect {
        name: "bsd-inet6",
        os: &["macos", "ios", "freebsd", "openbsd", "netbsd", "dragonfly"],
        ipv6: Some(true),
        program: "ping6",
        ipv4_flag: None,
        ipv6_flag: None,
        count_flag: "-c",
        size_flag: "-s",
        interval_flag: Some("-i"),
        ttl_flag: "-h",
        no_fragment: &[],
        fixed_args: &["-n"],
        patterns: &BSD6_PATTERNS,
    },
    Dialect {
        name: "windows",
        os: &["windows"],
        ipv6: None,
        program: "ping",
        ipv4_flag: Some("-4"),
        ipv6_flag: Some("-6"),
        count_flag: "-n",
        size_flag: "-l",
        interval_flag: None,
        ttl_flag: "-i",
        no_fragment: &["-f"],
        fixed_args: &[],
        patterns: &WINDOWS_PATTERNS,
    },
];

impl Dialect {
    /// Row for `os` and address family; unknown systems get the Linux row.
    pub fn select(os: &str, ipv6: bool) -> &'static Dialect {
        DIALECTS
            .iter()
            .find(|d| d.os.contains(&os) && d.ipv6.map_or(true, |v| v == ipv6))
            .unwrap_or(&DIALECTS[0])
    }

    /// Row for the platform this binary was built for.
    pub fn host(ipv6: bool) -> &'static Dialect {
        Self::select(std::env::consts::OS, ipv6)
    }

    pub fn by_name(name: &str) -> Option<&'static Dialect> {
        DIALECTS.iter().find(|d| d.name == name)
    }

    pub fn patterns(&self) -> &'static Patterns {
        self.patterns
    }

    /// Full argument list for probing `target`.
    ///
    /// Options the dialect has no flag for are dropped.
    pub fn build_args(&self, target: &ResolvedTarget, opts: &ProbeOptions) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        let family_flag = if target.is_ipv6() {
            self.ipv6_flag
        } else {
            self.ipv4_flag
        };
        args.extend(family_flag.map(String::from));
        args.extend(self.fixed_args.iter().map(|a| a.to_string()));

        if let Some(count) = opts.count {
            args.push(self.count_flag.to_string());
            args.push(count.to_string());
        }
        if let Some(size) = opts.size {
            args.push(self.size_flag.to_string());
            args.push(size.to_string());
        }
        if let (Some(interval), Some(flag)) = (opts.interval, self.interval_flag) {
            args.push(flag.to_string());
            args.push(interval.to_string());
        }
        if let Some(ttl) = opts.ttl {
            args.push(self.ttl_flag.to_string());
            args.push(ttl.to_string());
        }
        if opts.no_fragment {
            args.extend(self.no_fragment.iter().map(|a| a.to_string()));
        }

        args.push(target.to_string());
        args
    }
}

impl std::fmt::Debug for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialect")
            .field("name", &self.name)
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}
