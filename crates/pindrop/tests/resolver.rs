//! End-to-end resolver tests against an in-memory repository, so no network or real
//! artifacts are involved.

use async_trait::async_trait;
use pindrop::index::{PackageDb, Repository};
use pindrop::resolve::{
    resolve, Origin, PreReleaseResolution, Resolution, ResolveError, ResolveOptions,
    SDistResolution, TargetEnv, VersionStrategy,
};
use pindrop::tags::Os;
use pindrop::types::{
    ArtifactInfo, ArtifactName, DistInfoMetadata, NormalizedPackageName, ProjectInfo,
    UserRequirement, Yanked,
};
use pindrop::utils::StreamingOrLocal;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;

/// One published file of the fake index, plus the metadata it would serve for it.
#[derive(Clone)]
struct FileFixture {
    artifact: ArtifactInfo,
    metadata: Option<Vec<u8>>,
}

/// An in-memory simple index.
#[derive(Default, Clone)]
struct StaticRepository {
    files: HashMap<NormalizedPackageName, Vec<FileFixture>>,
}

#[async_trait]
impl Repository for StaticRepository {
    fn name(&self) -> String {
        "static test index".to_string()
    }

    async fn list(&self, name: &NormalizedPackageName) -> miette::Result<Option<ProjectInfo>> {
        Ok(self.files.get(name).map(|files| ProjectInfo {
            files: files.iter().map(|f| f.artifact.clone()).collect(),
        }))
    }

    async fn fetch_metadata(&self, artifact: &ArtifactInfo) -> miette::Result<Option<Vec<u8>>> {
        let filename = artifact.filename.to_string();
        Ok(self
            .files
            .values()
            .flatten()
            .find(|f| f.artifact.filename.to_string() == filename)
            .and_then(|f| f.metadata.clone()))
    }

    async fn fetch_artifact(
        &self,
        _artifact: &ArtifactInfo,
    ) -> miette::Result<Option<StreamingOrLocal>> {
        // everything goes through the standalone metadata path
        Ok(None)
    }
}

/// Describes one `{name, version}` of the fake index.
struct PackageFixture {
    name: String,
    version: String,
    kind: ArtifactKind,
    requires: Vec<String>,
    requires_python: Option<String>,
    extras: Vec<String>,
    yanked: bool,
    metadata_version: String,
    serve_metadata: bool,
}

#[derive(PartialEq)]
enum ArtifactKind {
    Wheel,
    SDist,
}

impl PackageFixture {
    fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind: ArtifactKind::Wheel,
            requires: Vec::new(),
            requires_python: None,
            extras: Vec::new(),
            yanked: false,
            metadata_version: "2.1".to_string(),
            serve_metadata: true,
        }
    }

    fn requires(mut self, req: &str) -> Self {
        self.requires.push(req.to_string());
        self
    }

    fn requires_python(mut self, spec: &str) -> Self {
        self.requires_python = Some(spec.to_string());
        self
    }

    fn extra(mut self, name: &str) -> Self {
        self.extras.push(name.to_string());
        self
    }

    fn yanked(mut self) -> Self {
        self.yanked = true;
        self
    }

    fn sdist(mut self) -> Self {
        self.kind = ArtifactKind::SDist;
        self
    }

    fn metadata_version(mut self, version: &str) -> Self {
        self.metadata_version = version.to_string();
        self
    }

    fn without_metadata(mut self) -> Self {
        self.serve_metadata = false;
        self
    }

    fn filename(&self) -> String {
        let dist = self.name.replace('-', "_");
        match self.kind {
            ArtifactKind::Wheel => format!("{dist}-{}-py3-none-any.whl", self.version),
            ArtifactKind::SDist => format!("{dist}-{}.tar.gz", self.version),
        }
    }

    fn metadata_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        writeln!(out, "Metadata-Version: {}", self.metadata_version).unwrap();
        writeln!(out, "Name: {}", self.name).unwrap();
        writeln!(out, "Version: {}", self.version).unwrap();
        if let Some(requires_python) = &self.requires_python {
            writeln!(out, "Requires-Python: {requires_python}").unwrap();
        }
        for req in &self.requires {
            writeln!(out, "Requires-Dist: {req}").unwrap();
        }
        for extra in &self.extras {
            writeln!(out, "Provides-Extra: {extra}").unwrap();
        }
        out.into_bytes()
    }

    fn build(&self) -> (NormalizedPackageName, FileFixture) {
        let name: NormalizedPackageName = self.name.parse().unwrap();
        let filename = ArtifactName::from_filename(&self.filename(), &name).unwrap();
        let url = url::Url::parse(&format!(
            "https://index.invalid/files/{}",
            self.filename()
        ))
        .unwrap();
        let artifact = ArtifactInfo {
            filename,
            url,
            hashes: None,
            requires_python: None,
            dist_info_metadata: DistInfoMetadata {
                available: self.serve_metadata,
                hashes: Default::default(),
            },
            yanked: Yanked {
                yanked: self.yanked,
                reason: None,
            },
        };
        (
            name,
            FileFixture {
                artifact,
                metadata: self.serve_metadata.then(|| self.metadata_bytes()),
            },
        )
    }
}

/// Drives one resolution against a fixture index without having to spell out every
/// parameter.
struct ResolveBuilder {
    packages: Vec<PackageFixture>,
    requirements: Vec<String>,
    python: String,
    os: Os,
    options: ResolveOptions,
}

impl Default for ResolveBuilder {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            requirements: Vec::new(),
            python: "3.10".to_string(),
            os: Os::Linux,
            options: ResolveOptions::default(),
        }
    }
}

impl ResolveBuilder {
    fn with_package(mut self, package: PackageFixture) -> Self {
        self.packages.push(package);
        self
    }

    fn with_requirement(mut self, req: &str) -> Self {
        self.requirements.push(req.to_string());
        self
    }

    fn with_python(mut self, version: &str) -> Self {
        self.python = version.to_string();
        self
    }

    fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    fn repository(&self) -> StaticRepository {
        let mut repo = StaticRepository::default();
        for package in &self.packages {
            let (name, file) = package.build();
            repo.files.entry(name).or_default().push(file);
        }
        repo
    }

    async fn resolve(self) -> Result<Resolution, ResolveError> {
        let cache_dir = tempfile::tempdir().unwrap();
        let db =
            PackageDb::with_repositories(vec![Box::new(self.repository())], cache_dir.path())
                .unwrap();
        let env = TargetEnv::new(&self.python, self.os).unwrap();
        let requirements: Vec<UserRequirement> = self
            .requirements
            .iter()
            .map(|req| UserRequirement::from_str(req).unwrap())
            .collect();
        resolve(&db, requirements.iter(), &env, &self.options).await
    }
}

fn pinned_version<'r>(resolution: &'r Resolution, name: &str) -> Option<String> {
    resolution
        .flat()
        .iter()
        .find(|pin| pin.name.as_str() == name)
        .map(|pin| pin.version.to_string())
}

/// A fixture index mirroring the flask 2.1.2 dependency closure.
fn flask_index() -> ResolveBuilder {
    ResolveBuilder::default()
        .with_package(
            PackageFixture::new("flask", "2.1.2")
                .requires_python(">=3.7")
                .requires("Werkzeug >=2.0")
                .requires("Jinja2 >=3.0")
                .requires("itsdangerous >=2.0")
                .requires("click >=8.0"),
        )
        .with_package(PackageFixture::new("click", "8.2.1").requires_python(">=3.7"))
        .with_package(PackageFixture::new("itsdangerous", "2.2.0"))
        .with_package(
            PackageFixture::new("jinja2", "3.1.6").requires("MarkupSafe >=2.0"),
        )
        .with_package(
            PackageFixture::new("werkzeug", "3.1.3").requires("MarkupSafe >=2.1.1"),
        )
        .with_package(PackageFixture::new("markupsafe", "3.0.2"))
}

#[tokio::test]
async fn flask_closure() {
    let resolution = flask_index()
        .with_requirement("flask ==2.1.2")
        .resolve()
        .await
        .unwrap();

    let mut names: Vec<&str> = resolution.flat().iter().map(|p| p.name.as_str()).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["click", "flask", "itsdangerous", "jinja2", "markupsafe", "werkzeug"]
    );
    assert_eq!(pinned_version(&resolution, "flask").as_deref(), Some("2.1.2"));
    assert_eq!(pinned_version(&resolution, "markupsafe").as_deref(), Some("3.0.2"));

    // tree: flask -> {werkzeug -> {markupsafe}, jinja2 -> {markupsafe}, itsdangerous, click}
    let tree = resolution.tree();
    assert_eq!(tree.len(), 1);
    let flask = &tree[0];
    assert_eq!(flask.package, "pkg:pypi/flask@2.1.2");
    assert_eq!(flask.dependencies.len(), 4);
    let jinja = flask
        .dependencies
        .iter()
        .find(|n| n.package == "pkg:pypi/jinja2@3.1.6")
        .unwrap();
    assert_eq!(jinja.dependencies[0].package, "pkg:pypi/markupsafe@3.0.2");
    let werkzeug = flask
        .dependencies
        .iter()
        .find(|n| n.package == "pkg:pypi/werkzeug@3.1.3")
        .unwrap();
    // markupsafe is duplicated at each site
    assert_eq!(werkzeug.dependencies[0].package, "pkg:pypi/markupsafe@3.0.2");
}

#[tokio::test]
async fn single_package_without_dependencies() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("crontab", "1.0.4"))
        .with_requirement("crontab ==1.0.4")
        .with_python("3.8")
        .resolve()
        .await
        .unwrap();

    assert_eq!(resolution.flat().len(), 1);
    assert_eq!(pinned_version(&resolution, "crontab").as_deref(), Some("1.0.4"));
    assert!(resolution.tree()[0].dependencies.is_empty());
}

#[tokio::test]
async fn backtracks_to_a_satisfiable_version() {
    // foo 1.0 needs bar>=2 which does not exist; foo 0.9 needs bar>=1 which does
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("foo", "1.0").requires("bar >=2"))
        .with_package(PackageFixture::new("foo", "0.9").requires("bar >=1"))
        .with_package(PackageFixture::new("bar", "1.5"))
        .with_requirement("foo")
        .resolve()
        .await
        .unwrap();

    assert_eq!(pinned_version(&resolution, "foo").as_deref(), Some("0.9"));
    assert_eq!(pinned_version(&resolution, "bar").as_deref(), Some("1.5"));
}

#[tokio::test]
async fn conflicting_requirements_report_both_sides() {
    // a needs c<2, b needs c>=2; c exists in both ranges but no version satisfies both
    let result = ResolveBuilder::default()
        .with_package(PackageFixture::new("a", "1.0").requires("c <2"))
        .with_package(PackageFixture::new("b", "1.0").requires("c >=2"))
        .with_package(PackageFixture::new("c", "1.5"))
        .with_package(PackageFixture::new("c", "2.0"))
        .with_requirement("a")
        .with_requirement("b")
        .resolve()
        .await;

    let Err(ResolveError::ResolutionImpossible { name, conflicts }) = result else {
        panic!("expected ResolutionImpossible, got {result:?}");
    };
    assert_eq!(name.as_str(), "c");
    let rendered: Vec<String> = conflicts.iter().map(|c| c.requirement.to_string()).collect();
    assert!(rendered.iter().any(|r| r == "c < 2"), "{rendered:?}");
    assert!(rendered.iter().any(|r| r == "c >= 2"), "{rendered:?}");
}

#[tokio::test]
async fn marker_excluded_dependency_is_absent() {
    let resolution = ResolveBuilder::default()
        .with_package(
            PackageFixture::new("pkg", "3.0").requires("dep ; python_version < '3.9'"),
        )
        .with_package(PackageFixture::new("dep", "1.0"))
        .with_requirement("pkg")
        .with_python("3.10")
        .resolve()
        .await
        .unwrap();

    assert_eq!(resolution.flat().len(), 1);
    assert!(pinned_version(&resolution, "dep").is_none());
}

#[tokio::test]
async fn marker_included_dependency_is_present() {
    let resolution = ResolveBuilder::default()
        .with_package(
            PackageFixture::new("pkg", "3.0").requires("dep ; python_version < '3.9'"),
        )
        .with_package(PackageFixture::new("dep", "1.0"))
        .with_requirement("pkg")
        .with_python("3.8")
        .resolve()
        .await
        .unwrap();

    assert_eq!(pinned_version(&resolution, "dep").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn extras_attach_to_the_same_pin() {
    let resolution = ResolveBuilder::default()
        .with_package(
            PackageFixture::new("x", "1.0")
                .extra("extra1")
                .requires("y >=1 ; extra == 'extra1'"),
        )
        .with_package(PackageFixture::new("y", "1.0"))
        .with_package(PackageFixture::new("y", "2.3"))
        .with_requirement("x[extra1] ==1.0")
        .resolve()
        .await
        .unwrap();

    // no separate node for x[extra1]
    assert_eq!(resolution.flat().len(), 2);
    assert_eq!(pinned_version(&resolution, "y").as_deref(), Some("2.3"));
    let x = resolution
        .flat()
        .iter()
        .find(|p| p.name.as_str() == "x")
        .unwrap();
    assert_eq!(x.extras.len(), 1);
    assert_eq!(x.extras[0].as_str(), "extra1");

    // y hangs off the x pin in the tree
    let tree = resolution.tree();
    assert_eq!(tree[0].package, "pkg:pypi/x@1.0");
    assert_eq!(tree[0].dependencies[0].package, "pkg:pypi/y@2.3");
}

#[tokio::test]
async fn extras_reexpand_an_existing_pin() {
    // x is pinned without extras first; y then asks for x[feature], which must expand
    // the feature dependencies onto the existing pin
    let resolution = ResolveBuilder::default()
        .with_package(
            PackageFixture::new("x", "1.0")
                .extra("feature")
                .requires("z >=1 ; extra == 'feature'"),
        )
        .with_package(PackageFixture::new("y", "1.0").requires("x[feature] >=1"))
        .with_package(PackageFixture::new("z", "1.2"))
        .with_requirement("x")
        .with_requirement("y")
        .resolve()
        .await
        .unwrap();

    assert_eq!(pinned_version(&resolution, "z").as_deref(), Some("1.2"));
    let x = resolution
        .flat()
        .iter()
        .find(|p| p.name.as_str() == "x")
        .unwrap();
    assert_eq!(x.extras.len(), 1);
    assert_eq!(x.extras[0].as_str(), "feature");
}

#[tokio::test]
async fn highest_version_wins() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "1.2"))
        .with_package(PackageFixture::new("pkg", "1.1"))
        .with_requirement("pkg")
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.2"));
}

#[tokio::test]
async fn lowest_strategy_picks_the_lowest_version() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "1.2"))
        .with_package(PackageFixture::new("pkg", "1.1"))
        .with_requirement("pkg")
        .with_options(ResolveOptions {
            version_strategy: VersionStrategy::Lowest,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn lowest_strategy_still_prefers_stable_over_prereleases() {
    // 2.5rc1 sits between the stable releases by magnitude, but the stable group is
    // exhausted lowest-first before any pre-release is tried
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "3.0"))
        .with_package(PackageFixture::new("pkg", "2.0"))
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "2.5rc1"))
        .with_requirement("pkg")
        .with_options(ResolveOptions {
            version_strategy: VersionStrategy::Lowest,
            pre_release_resolution: PreReleaseResolution::Allow,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn lowest_strategy_falls_back_to_the_lowest_prerelease() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "2.0b1"))
        .with_package(PackageFixture::new("pkg", "1.0a1"))
        .with_requirement("pkg")
        .with_options(ResolveOptions {
            version_strategy: VersionStrategy::Lowest,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0a1"));
}

#[tokio::test]
async fn latest_strategy_orders_purely_by_magnitude() {
    // 2.5rc1 outranks every stable release, so with pre-releases admitted it wins
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "2.0"))
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "2.5rc1"))
        .with_requirement("pkg")
        .with_options(ResolveOptions {
            version_strategy: VersionStrategy::LatestIncludingPrereleases,
            pre_release_resolution: PreReleaseResolution::Allow,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("2.5rc1"));
}

#[tokio::test]
async fn latest_strategy_still_respects_prerelease_admission() {
    // without admission the pre-release never enters the candidate set, so the
    // highest stable release wins even under the magnitude-only ordering
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "2.0"))
        .with_package(PackageFixture::new("pkg", "2.5rc1"))
        .with_requirement("pkg")
        .with_options(ResolveOptions {
            version_strategy: VersionStrategy::LatestIncludingPrereleases,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("2.0"));
}

#[tokio::test]
async fn prereleases_are_excluded_by_default() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "2.0rc1"))
        .with_requirement("pkg")
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn prerelease_admitted_when_specifier_mentions_one() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "2.0rc1"))
        .with_requirement("pkg >=2.0rc1")
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("2.0rc1"));
}

#[tokio::test]
async fn prerelease_admitted_when_nothing_else_exists() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0b1"))
        .with_requirement("pkg")
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0b1"));
}

#[tokio::test]
async fn prerelease_admitted_globally_with_allow() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "2.0rc1"))
        .with_requirement("pkg")
        .with_options(ResolveOptions {
            pre_release_resolution: PreReleaseResolution::Allow,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("2.0rc1"));
}

#[tokio::test]
async fn yanked_versions_are_skipped() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "1.1").yanked())
        .with_requirement("pkg")
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn yanked_version_selected_by_exact_pin_warns() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("pkg", "1.1").yanked())
        .with_requirement("pkg ==1.1")
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.1"));
    assert_eq!(resolution.warnings.len(), 1);
    assert!(resolution.warnings[0].contains("yanked"));
}

#[tokio::test]
async fn requires_python_rejects_incompatible_versions() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "2.0").requires_python(">=3.12"))
        .with_package(PackageFixture::new("pkg", "1.0").requires_python(">=3.8"))
        .with_requirement("pkg")
        .with_python("3.10")
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn unsupported_python_when_every_version_is_excluded() {
    let result = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "2.0").requires_python(">=3.12"))
        .with_package(PackageFixture::new("pkg", "1.0").requires_python(">=3.11"))
        .with_requirement("pkg")
        .with_python("3.10")
        .resolve()
        .await;

    assert!(
        matches!(result, Err(ResolveError::UnsupportedPython { ref name, .. }) if name.as_str() == "pkg"),
        "{result:?}"
    );
}

#[tokio::test]
async fn unknown_package_is_no_versions_found() {
    let result = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0").requires("ghost >=1"))
        .with_requirement("pkg")
        .resolve()
        .await;

    assert!(
        matches!(result, Err(ResolveError::NoVersionsFound { ref name }) if name.as_str() == "ghost"),
        "{result:?}"
    );
}

#[tokio::test]
async fn dependency_cycles_are_cut() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("a", "1.0").requires("b"))
        .with_package(PackageFixture::new("b", "1.0").requires("a"))
        .with_requirement("a")
        .resolve()
        .await
        .unwrap();

    assert_eq!(resolution.flat().len(), 2);
    let tree = resolution.tree();
    let a = &tree[0];
    let b = &a.dependencies[0];
    assert_eq!(b.package, "pkg:pypi/b@1.0");
    // the cyclic edge back to a was dropped during resolution
    assert!(b.dependencies.is_empty());
}

#[tokio::test]
async fn sdist_metadata_prefers_wheel_unless_told_otherwise() {
    // the wheel and the sdist of pick 1.0 disagree about their dependency, which makes
    // the preferred artifact observable
    let builder = || {
        ResolveBuilder::default()
            .with_package(PackageFixture::new("pick", "1.0").requires("from-wheel >=1"))
            .with_package(
                PackageFixture::new("pick", "1.0")
                    .sdist()
                    .metadata_version("2.2")
                    .requires("from-sdist >=1"),
            )
            .with_package(PackageFixture::new("from-wheel", "1.0"))
            .with_package(PackageFixture::new("from-sdist", "1.0"))
            .with_requirement("pick")
    };

    let resolution = builder().resolve().await.unwrap();
    assert!(pinned_version(&resolution, "from-wheel").is_some());
    assert!(pinned_version(&resolution, "from-sdist").is_none());

    let resolution = builder()
        .with_options(ResolveOptions {
            sdist_resolution: SDistResolution::PreferSDists,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert!(pinned_version(&resolution, "from-sdist").is_some());
    assert!(pinned_version(&resolution, "from-wheel").is_none());
}

#[tokio::test]
async fn dynamic_sdist_metadata_is_rejected_without_opt_in() {
    // metadata 2.1 predates PEP 643, so nothing guarantees the dependencies are static
    let builder = || {
        ResolveBuilder::default().with_package(
            PackageFixture::new("legacy", "1.0")
                .sdist()
                .metadata_version("2.1"),
        )
    };

    let result = builder().with_requirement("legacy").resolve().await;
    assert!(
        matches!(result, Err(ResolveError::MetadataUnavailable { .. })),
        "{result:?}"
    );

    let resolution = builder()
        .with_requirement("legacy")
        .with_options(ResolveOptions {
            allow_insecure_metadata: true,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "legacy").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn ignore_errors_skips_broken_candidates() {
    let builder = || {
        ResolveBuilder::default()
            .with_package(PackageFixture::new("pkg", "2.0").without_metadata())
            .with_package(PackageFixture::new("pkg", "1.0"))
            .with_requirement("pkg")
    };

    // without the flag the broken candidate aborts the resolution
    let result = builder().resolve().await;
    assert!(
        matches!(result, Err(ResolveError::MetadataUnavailable { .. })),
        "{result:?}"
    );

    // with it, the next candidate is used
    let resolution = builder()
        .with_options(ResolveOptions {
            ignore_errors: true,
            ..Default::default()
        })
        .resolve()
        .await
        .unwrap();
    assert_eq!(pinned_version(&resolution, "pkg").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn input_order_does_not_change_the_assignment() {
    let fixture = || {
        ResolveBuilder::default()
            .with_package(PackageFixture::new("a", "1.0").requires("shared >=1"))
            .with_package(PackageFixture::new("b", "1.0").requires("shared <2"))
            .with_package(PackageFixture::new("shared", "1.4"))
            .with_package(PackageFixture::new("shared", "2.1"))
    };

    let forward = fixture()
        .with_requirement("a")
        .with_requirement("b")
        .resolve()
        .await
        .unwrap();
    let backward = fixture()
        .with_requirement("b")
        .with_requirement("a")
        .resolve()
        .await
        .unwrap();

    let mut forward_pins: Vec<(String, String)> = forward
        .flat()
        .iter()
        .map(|p| (p.name.to_string(), p.version.to_string()))
        .collect();
    let mut backward_pins: Vec<(String, String)> = backward
        .flat()
        .iter()
        .map(|p| (p.name.to_string(), p.version.to_string()))
        .collect();
    forward_pins.sort();
    backward_pins.sort();
    assert_eq!(forward_pins, backward_pins);
    assert_eq!(pinned_version(&forward, "shared").as_deref(), Some("1.4"));
}

#[tokio::test]
async fn rerunning_with_a_warm_cache_is_idempotent() {
    let builder = flask_index().with_requirement("flask ==2.1.2");
    let repo = builder.repository();
    let cache_dir = tempfile::tempdir().unwrap();
    let env = TargetEnv::new("3.10", Os::Linux).unwrap();
    let requirements = vec![UserRequirement::from_str("flask ==2.1.2").unwrap()];
    let options = ResolveOptions::default();

    let db = PackageDb::with_repositories(vec![Box::new(repo.clone())], cache_dir.path())
        .unwrap();
    let first = resolve(&db, requirements.iter(), &env, &options).await.unwrap();

    // second run, same cache directory
    let db = PackageDb::with_repositories(vec![Box::new(repo)], cache_dir.path()).unwrap();
    let second = resolve(&db, requirements.iter(), &env, &options).await.unwrap();

    let first_json =
        serde_json::to_string(&first.graph_document(&["flask ==2.1.2".to_string()], &env))
            .unwrap();
    let second_json =
        serde_json::to_string(&second.graph_document(&["flask ==2.1.2".to_string()], &env))
            .unwrap();
    assert_eq!(first_json, second_json);
}

#[tokio::test]
async fn graph_is_topological_with_alphabetical_ties() {
    let resolution = flask_index()
        .with_requirement("flask ==2.1.2")
        .resolve()
        .await
        .unwrap();

    let graph = resolution.graph();
    let order: Vec<&str> = graph.iter().map(|e| e.package.as_str()).collect();
    assert_eq!(
        order,
        vec![
            "pkg:pypi/flask@2.1.2",
            "pkg:pypi/click@8.2.1",
            "pkg:pypi/itsdangerous@2.2.0",
            "pkg:pypi/jinja2@3.1.6",
            "pkg:pypi/werkzeug@3.1.3",
            "pkg:pypi/markupsafe@3.0.2",
        ]
    );

    // every pin appears exactly once
    let mut unique: Vec<&str> = order.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), order.len());
}

#[tokio::test]
async fn roots_gated_by_markers_are_skipped() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_package(PackageFixture::new("winpkg", "1.0"))
        .with_requirement("pkg")
        .with_requirement("winpkg ; sys_platform == 'win32'")
        .resolve()
        .await
        .unwrap();

    assert_eq!(resolution.flat().len(), 1);
    assert!(pinned_version(&resolution, "winpkg").is_none());
}

#[tokio::test]
async fn root_edges_preserve_origin() {
    let resolution = ResolveBuilder::default()
        .with_package(PackageFixture::new("pkg", "1.0"))
        .with_requirement("pkg")
        .resolve()
        .await
        .unwrap();
    let roots: Vec<_> = resolution
        .edges
        .iter()
        .filter(|e| e.origin == Origin::Root)
        .collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].child.as_str(), "pkg");
}
