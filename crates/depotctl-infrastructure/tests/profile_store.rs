use depotctl_core::DepotError;
use depotctl_core::profile::{Profile, ProfileRepository, SaveMode};
use depotctl_infrastructure::{DepotPaths, TomlProfileRepository};
use std::fs;
use tempfile::TempDir;

fn repo(temp_dir: &TempDir) -> TomlProfileRepository {
    TomlProfileRepository::new(&DepotPaths::with_base(temp_dir.path()))
}

#[tokio::test]
async fn save_then_load_returns_identical_profile() {
    let temp_dir = TempDir::new().unwrap();
    let repo = repo(&temp_dir);

    let upload = Profile::upload("nightly", 480, 481, "/builds/My Game")
        .with_channel("beta")
        .with_description("Nightly build");
    let download =
        Profile::download("archive", 480, 482, "/srv/archive").with_manifest("3183503801510301321");

    repo.save(&upload, SaveMode::Create).await.unwrap();
    repo.save(&download, SaveMode::Create).await.unwrap();

    assert_eq!(repo.load("nightly").await.unwrap(), upload);
    assert_eq!(repo.load("archive").await.unwrap(), download);

    let names: Vec<String> = repo
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["archive", "nightly"]);
}

#[tokio::test]
async fn duplicate_name_leaves_existing_record() {
    let temp_dir = TempDir::new().unwrap();
    let repo = repo(&temp_dir);

    let original = Profile::upload("nightly", 480, 481, "/builds/a");
    repo.save(&original, SaveMode::Create).await.unwrap();

    let clash = Profile::upload("nightly", 999, 998, "/builds/b");
    let err = repo.save(&clash, SaveMode::Create).await.unwrap_err();
    assert!(matches!(err, DepotError::DuplicateName(ref name) if name == "nightly"));
    assert_eq!(repo.load("nightly").await.unwrap(), original);

    // An explicit update replaces it
    repo.save(&clash, SaveMode::Update).await.unwrap();
    assert_eq!(repo.load("nightly").await.unwrap().app_id, 999);
}

#[tokio::test]
async fn delete_then_load_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let repo = repo(&temp_dir);

    repo.save(&Profile::upload("nightly", 480, 481, "/b"), SaveMode::Create)
        .await
        .unwrap();
    repo.delete("nightly").await.unwrap();

    assert!(repo.load("nightly").await.unwrap_err().is_not_found());
    assert!(repo.delete("nightly").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn invalid_profile_is_not_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let repo = repo(&temp_dir);

    let err = repo
        .save(&Profile::upload("bad", 0, 481, "/b"), SaveMode::Create)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(repo.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_store_fails_closed_and_can_be_quarantined() {
    let temp_dir = TempDir::new().unwrap();
    let repo = repo(&temp_dir);
    fs::write(repo.path(), "[[profile]]\nname = \"x\"\napp_id = \"not a number\"\n").unwrap();

    assert!(repo.list().await.unwrap_err().is_corrupt_store());
    assert!(repo
        .save(&Profile::upload("n", 1, 2, "/b"), SaveMode::Create)
        .await
        .unwrap_err()
        .is_corrupt_store());

    let moved = repo.quarantine().unwrap().unwrap();
    assert!(moved.exists());
    assert!(repo.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn newer_schema_major_is_corrupt() {
    let temp_dir = TempDir::new().unwrap();
    let repo = repo(&temp_dir);
    fs::write(repo.path(), "version = \"2.0.0\"\n").unwrap();

    assert!(repo.list().await.unwrap_err().is_corrupt_store());
}

#[tokio::test]
async fn saved_store_is_versioned_and_older_layouts_load() {
    let temp_dir = TempDir::new().unwrap();
    let repo = repo(&temp_dir);

    repo.save(&Profile::upload("nightly", 480, 481, "/b"), SaveMode::Create)
        .await
        .unwrap();
    let text = fs::read_to_string(repo.path()).unwrap();
    assert!(text.contains("version = \"1.0.0\""));
    assert!(text.contains("[[profile]]"));
    assert!(!text.contains("channel"));

    // Unversioned files and newer minor releases read as the current layout
    fs::write(
        repo.path(),
        "[[profile]]\nname = \"old\"\nkind = \"download\"\napp_id = 1\ndepot_id = 2\npath = \"/d\"\n",
    )
    .unwrap();
    assert_eq!(repo.load("old").await.unwrap().depot_id, 2);

    fs::write(
        repo.path(),
        "version = \"1.4.0\"\n\n[[profile]]\nname = \"new\"\nkind = \"upload\"\napp_id = 1\ndepot_id = 2\npath = \"/b\"\nlabels = [\"x\"]\n",
    )
    .unwrap();
    assert_eq!(repo.list().await.unwrap()[0].name, "new");
}
