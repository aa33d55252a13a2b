use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, warn};

use super::{Downstream, Stream, StreamChain, StreamId, StreamQuery, StreamReply, Tracks};
use crate::config::ChainElement;
use crate::core::{Block, EsCategory, EsFormat};
use crate::error::{SoutError, SoutResult};
use crate::instance::SoutContext;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Es {
        ids: Vec<RangeInclusive<i32>>,
        negated: bool,
    },
    Category {
        category: EsCategory,
        negated: bool,
    },
}

impl Rule {
    fn matches(&self, format: &EsFormat) -> bool {
        match self {
            Rule::Es { ids, negated } => ids.iter().any(|r| r.contains(&format.id)) != *negated,
            Rule::Category { category, negated } => (format.category == *category) != *negated,
        }
    }
}

/// Track filter of a duplicate branch, e.g. `es=1-3,novideo`.
///
/// Every rule must match. Bare numbers and ranges extend the preceding
/// `es=`/`noes=` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    rules: Vec<Rule>,
}

impl Selector {
    /// Whether a track of `format` goes to the branch
    pub fn matches(&self, format: &EsFormat) -> bool {
        self.rules.iter().all(|rule| rule.matches(format))
    }
}

fn parse_id_range(s: &str) -> SoutResult<RangeInclusive<i32>> {
    let bad = || SoutError::Config(format!("invalid es id range \"{s}\""));
    match s.split_once('-') {
        Some((lo, hi)) => {
            let lo: i32 = lo.trim().parse().map_err(|_| bad())?;
            let hi: i32 = hi.trim().parse().map_err(|_| bad())?;
            Ok(lo..=hi)
        }
        None => {
            let id: i32 = s.trim().parse().map_err(|_| bad())?;
            Ok(id..=id)
        }
    }
}

impl FromStr for Selector {
    type Err = SoutError;

    fn from_str(s: &str) -> SoutResult<Self> {
        let mut rules: Vec<Rule> = Vec::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some((key, value)) = token.split_once('=') {
                let negated = match key.trim() {
                    "es" => false,
                    "noes" => true,
                    other => {
                        return Err(SoutError::Config(format!("unknown select key \"{other}\"")));
                    }
                };
                rules.push(Rule::Es {
                    ids: vec![parse_id_range(value)?],
                    negated,
                });
                continue;
            }
            if token.starts_with(|c: char| c.is_ascii_digit()) {
                match rules.last_mut() {
                    Some(Rule::Es { ids, .. }) => ids.push(parse_id_range(token)?),
                    _ => {
                        return Err(SoutError::Config(format!(
                            "es id \"{token}\" outside of an es= list"
                        )));
                    }
                }
                continue;
            }
            let (name, negated) = match token.strip_prefix("no") {
                Some(rest) => (rest, true),
                None => (token, false),
            };
            let category = match name {
                "video" => EsCategory::Video,
                "audio" => EsCategory::Audio,
                "spu" => EsCategory::Spu,
                _ => return Err(SoutError::Config(format!("unknown select rule \"{token}\""))),
            };
            rules.push(Rule::Category { category, negated });
        }
        Ok(Selector { rules })
    }
}

struct Branch {
    description: String,
    select: Option<Selector>,
    chain: StreamChain,
}

/// Terminal stage sending every track to several sub-chains.
///
/// `duplicate{dst=..,select=..,dst=..}`: a `select` applies to the `dst`
/// before it. Every branch but the last receives a shared duplicate of each
/// block, the last one receives the block itself.
pub struct DuplicateStream {
    branches: Vec<Branch>,
    tracks: Tracks<Vec<Option<StreamId>>>,
}

impl DuplicateStream {
    /// Open every branch; fails if any branch fails
    pub fn open(ctx: &Arc<SoutContext>, element: &ChainElement) -> SoutResult<Self> {
        let mut branches: Vec<Branch> = Vec::new();
        for option in element.options() {
            match (option.key.as_str(), option.value.as_deref()) {
                ("dst", Some(dst)) => {
                    debug!("duplicate: creating branch {} ({})", branches.len(), dst);
                    let chain = StreamChain::new(ctx, dst)?;
                    branches.push(Branch {
                        description: dst.to_string(),
                        select: None,
                        chain,
                    });
                }
                ("select", Some(select)) => {
                    let selector: Selector = select.parse()?;
                    match branches.last_mut() {
                        Some(branch) => branch.select = Some(selector),
                        None => warn!("duplicate: select \"{}\" before any dst ignored", select),
                    }
                }
                (key, _) => debug!("duplicate: ignoring option {}", key),
            }
        }
        if branches.is_empty() {
            return Err(SoutError::ModuleOpen {
                module: "duplicate".to_string(),
                reason: "no destination given".to_string(),
            });
        }
        Ok(DuplicateStream {
            branches,
            tracks: Tracks::new(),
        })
    }

    /// Number of branches
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    fn targets(&self, id: StreamId) -> SoutResult<Vec<(usize, StreamId)>> {
        let ids = self.tracks.get(id)?;
        Ok(ids
            .iter()
            .enumerate()
            .filter_map(|(i, down)| down.map(|down| (i, down)))
            .collect())
    }
}

impl Stream for DuplicateStream {
    fn name(&self) -> &'static str {
        "duplicate"
    }

    fn add(&mut self, _next: Downstream<'_>, format: &Arc<EsFormat>) -> SoutResult<StreamId> {
        let mut ids = Vec::with_capacity(self.branches.len());
        for (i, branch) in self.branches.iter_mut().enumerate() {
            if branch.select.as_ref().is_some_and(|s| !s.matches(format)) {
                debug!("duplicate: es {} not selected for branch {}", format.id, i);
                ids.push(None);
                continue;
            }
            match branch.chain.add(format) {
                Ok(down) => ids.push(Some(down)),
                Err(e) => {
                    debug!(
                        "duplicate: branch {} ({}) refused es {}: {}",
                        i, branch.description, format.id, e
                    );
                    ids.push(None);
                }
            }
        }
        if ids.iter().all(Option::is_none) {
            return Err(SoutError::CannotAddStream(format!(
                "no duplicate branch accepted es {}",
                format.id
            )));
        }
        Ok(self.tracks.insert(ids))
    }

    fn del(&mut self, _next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let ids = self.tracks.remove(id)?;
        let mut result = Ok(());
        for (branch, down) in self.branches.iter_mut().zip(ids) {
            if let Some(down) = down {
                result = result.and(branch.chain.del(down));
            }
        }
        result
    }

    fn send(&mut self, _next: Downstream<'_>, id: StreamId, block: Block) -> SoutResult<()> {
        let targets = self.targets(id)?;
        let Some((&(last, last_down), rest)) = targets.split_last() else {
            return Ok(());
        };
        let mut result = Ok(());
        for &(i, down) in rest {
            if let Err(e) = self.branches[i].chain.send(down, block.duplicate()) {
                warn!("duplicate: branch {} failed: {}", i, e);
                result = result.and(Err(e));
            }
        }
        result.and(self.branches[last].chain.send(last_down, block))
    }

    fn flush(&mut self, _next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let mut result = Ok(());
        for (i, down) in self.targets(id)? {
            result = result.and(self.branches[i].chain.flush(down));
        }
        result
    }

    fn control(&mut self, _next: Downstream<'_>, query: StreamQuery) -> SoutResult<StreamReply> {
        match query {
            StreamQuery::IsEmpty => Ok(StreamReply::Bool(self.branches.iter_mut().all(|b| {
                b.chain
                    .control(StreamQuery::IsEmpty)
                    .and_then(StreamReply::into_bool)
                    .unwrap_or(true)
            }))),
            StreamQuery::IsSynchronous => {
                Ok(StreamReply::Bool(self.branches.iter_mut().any(|b| {
                    b.chain
                        .control(StreamQuery::IsSynchronous)
                        .and_then(StreamReply::into_bool)
                        .unwrap_or(false)
                })))
            }
            StreamQuery::GetMime => Err(SoutError::Unsupported("MIME type of a duplicated output")),
        }
    }

    fn tick(&mut self, _next: Downstream<'_>) -> SoutResult<()> {
        let mut result = Ok(());
        for branch in &mut self.branches {
            result = result.and(branch.chain.tick());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FourCC;
    use crate::stream::tests::context;
    use tempfile::TempDir;

    #[test]
    fn test_selector() {
        let audio = EsFormat::audio(FourCC::new(b"s16l"), 8000, 1, 16).with_id(2);
        let video = EsFormat::video(FourCC::new(b"h264"), 8, 8).with_id(5);

        let s: Selector = "es=1-3".parse().unwrap();
        assert!(s.matches(&audio));
        assert!(!s.matches(&video));

        let s: Selector = "noes=2,7".parse().unwrap();
        assert!(!s.matches(&audio));
        assert!(s.matches(&video));

        let s: Selector = "es=1,5,novideo".parse().unwrap();
        assert!(!s.matches(&audio));
        assert!(!s.matches(&video));

        let s: Selector = "video".parse().unwrap();
        assert!(s.matches(&video));
        assert!(!s.matches(&audio));

        assert!("7".parse::<Selector>().is_err());
        assert!("nosubs".parse::<Selector>().is_err());
        assert!("es=x".parse::<Selector>().is_err());
    }

    #[test]
    fn test_fan_out_with_select() {
        let dir = TempDir::new().unwrap();
        let all = dir.path().join("all.raw");
        let audio_only = dir.path().join("audio.raw");
        let ctx = context();
        let description = format!(
            "duplicate{{dst=std{{access=file,mux=dummy,dst=\"{}\"}},dst=std{{access=file,mux=dummy,dst=\"{}\"}},select=audio}}",
            all.display(),
            audio_only.display()
        );
        let mut chain = StreamChain::new(&ctx, &description).unwrap();

        let audio = Arc::new(EsFormat::audio(FourCC::new(b"s16l"), 8000, 1, 16));
        let video = Arc::new(EsFormat::video(FourCC::new(b"h264"), 8, 8));
        let a = chain.add(&audio).unwrap();
        let v = chain.add(&video).unwrap();

        let block = Block::from_slice(b"AAAA").with_timestamps(0, 0);
        let probe = block.duplicate();
        chain.send(a, block).unwrap();
        chain.send(v, Block::from_slice(b"VV").with_timestamps(10, 10)).unwrap();
        drop(chain);

        assert_eq!(probe.shared_count(), 1);
        assert_eq!(std::fs::read(&all).unwrap(), b"AAAAVV");
        assert_eq!(std::fs::read(&audio_only).unwrap(), b"AAAA");
    }

    #[test]
    fn test_needs_a_destination() {
        let ctx = context();
        let element = ChainElement::parse("duplicate{select=audio}").unwrap();
        assert!(DuplicateStream::open(&ctx, &element).is_err());
    }

    #[test]
    fn test_rejected_everywhere() {
        let ctx = context();
        let element =
            ChainElement::parse("duplicate{dst=dummy,select=video,dst=dummy,select=spu}").unwrap();
        let mut dup = DuplicateStream::open(&ctx, &element).unwrap();
        assert_eq!(dup.branch_count(), 2);

        let audio = Arc::new(EsFormat::audio(FourCC::new(b"s16l"), 8000, 1, 16));
        let mut none: Vec<Box<dyn Stream>> = Vec::new();
        let err = dup.add(Downstream::new(&mut none, "test"), &audio).unwrap_err();
        assert!(matches!(err, SoutError::CannotAddStream(_)));
    }
}
